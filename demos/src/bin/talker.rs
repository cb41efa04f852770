//! Advertises `/chatter` (`std_msgs/String`) and publishes a counting
//! message once a second.

use ros1_core_types::{Name, RosValue};
use ros1_node::Node;
use ros1_node_demos::StdMsgsStringResolver;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let master_uri = std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_string());
    let node = Node::start(Name::new("/talker_rs")?, master_uri, None, Arc::new(StdMsgsStringResolver)).await?;

    let publication = node
        .advertise("/chatter", "std_msgs/String", false, None, None)
        .await?;

    let mut count: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::warn!("ctrl-c, shutting down");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                let text = format!("hello world {count}");
                log::info!("publishing: {text}");
                publication
                    .publish(&RosValue::Struct(vec![("data".to_string(), RosValue::String(text))]))
                    .await?;
                count += 1;
            }
        }
    }

    node.shutdown().await;
    Ok(())
}
