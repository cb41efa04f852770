//! Subscribes to `/chatter` (`std_msgs/String`) and logs every decoded
//! message.

use ros1_core_types::Name;
use ros1_node::{Node, SubscriptionEvent};
use ros1_node_demos::StdMsgsStringResolver;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let master_uri = std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = Node::start(Name::new("/listener_rs")?, master_uri, None, Arc::new(StdMsgsStringResolver)).await?;

    let subscription = node.subscribe("/chatter", "std_msgs/String", None, false).await?;
    let mut events = subscription.subscribe_events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::warn!("ctrl-c, exiting");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SubscriptionEvent::Message { value, .. }) => {
                        if let Some(ros1_core_types::RosValue::String(s)) = value.field("data") {
                            log::info!("[/listener_rs] got message: {s}");
                        }
                    }
                    Ok(SubscriptionEvent::Error { message, .. }) => log::warn!("subscription error: {message}"),
                    Ok(SubscriptionEvent::Header { .. }) => {}
                    Err(_) => break,
                }
            }
        }
    }

    log::info!("done subscribing, letting subscription unregister");
    node.shutdown().await;
    Ok(())
}
