//! Auto-responding attendance backend for simulations.

use bytes::Bytes;
use rollcall_core::{AttendanceMethod, DeviceId};
use rollcall_transport::{LocalBroker, PubSubChannel, Publication};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Filter covering the request topic of every method.
pub const REQUEST_FILTER: &str = "attendance/+/request";

/// Reply text for a method.
pub fn reply_for(method: AttendanceMethod) -> &'static str {
    match method {
        AttendanceMethod::CheckIn => "Welcome",
        AttendanceMethod::CheckOut => "Goodbye",
    }
}

/// Work out where to answer a request.
///
/// Returns `None` for requests that carry no usable method or device id.
pub fn response_for(request: &Publication) -> Option<(String, &'static str)> {
    let method: AttendanceMethod = request.topic.split('/').nth(1)?.parse().ok()?;
    let body: serde_json::Value = serde_json::from_slice(&request.payload).ok()?;
    let device = DeviceId::new(body.get("device_id")?.as_str()?).ok()?;
    Some((method.response_topic(&device), reply_for(method)))
}

/// Answer every submission request on `broker` until the broker goes away.
pub async fn spawn(broker: LocalBroker) -> rollcall_transport::Result<JoinHandle<()>> {
    let mut requests = broker.subscribe(REQUEST_FILTER).await?;
    Ok(tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let Some((topic, reply)) = response_for(&request) else {
                warn!(topic = %request.topic, "backend ignoring malformed request");
                continue;
            };
            debug!(%topic, reply, "backend responding");
            if let Err(e) = broker.publish(&topic, Bytes::from_static(reply.as_bytes())).await {
                warn!(%topic, error = %e, "backend could not respond");
            }
        }
    }))
}
