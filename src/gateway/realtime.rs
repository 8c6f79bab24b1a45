//! Server-sent-events change feed. The transport owns reconnection; consumers just
//! read a stream of `ChangeEvent`s that ends when the feed gives up.

use backon::{ExponentialBuilder, Retryable};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChangeEvent, ChangeStream, Filter};
use crate::error::{GatewayError, IsRetryable};

const FEED_BUFFER: usize = 64;
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

enum Pump {
    Disconnected,
    ReceiverGone,
}

/// Spawns the feed task for `table` and returns its receiving end.
pub(super) fn subscribe(
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
    table: &str,
    filter: Option<Filter>,
    max_retries: usize,
) -> ChangeStream {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let table = table.to_string();
    tokio::spawn(async move {
        run_feed(&client, &url, &headers, &table, filter.as_ref(), max_retries, &tx).await;
        debug!(table = %table, "realtime feed task finished");
    });
    Box::pin(ReceiverStream::new(rx))
}

async fn run_feed(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
    table: &str,
    filter: Option<&Filter>,
    max_retries: usize,
    tx: &mpsc::Sender<ChangeEvent>,
) {
    let policy = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(max_retries)
        .with_jitter();

    loop {
        let connect = || open(client, url, headers, table, filter);
        let resp = tokio::select! {
            () = tx.closed() => return,
            resp = connect
                .retry(policy)
                .when(|err: &GatewayError| err.is_retryable())
                .notify(|err, dur: Duration| {
                    warn!(table, "realtime feed retrying after error {} in {:?}", err, dur);
                }) => resp,
        };
        let resp = match resp {
            Ok(resp) => resp,
            Err(err) => {
                warn!(table, error = %err, "realtime feed gave up");
                return;
            }
        };

        info!(table, "realtime feed connected");
        match pump(resp.bytes_stream(), tx).await {
            Pump::ReceiverGone => return,
            Pump::Disconnected => warn!(table, "realtime feed disconnected, reconnecting"),
        }
        tokio::select! {
            () = tx.closed() => return,
            () = tokio::time::sleep(RECONNECT_PAUSE) => {}
        }
    }
}

async fn open(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
    table: &str,
    filter: Option<&Filter>,
) -> Result<reqwest::Response, GatewayError> {
    let mut params = vec![("table".to_string(), table.to_string())];
    if let Some(filter) = filter {
        let (column, op) = filter.to_param();
        params.push(("filter".to_string(), format!("{column}={op}")));
    }
    let resp = client
        .get(url.clone())
        .headers(headers.clone())
        .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
        .query(&params)
        .timeout(Duration::from_secs(60 * 60 * 24))
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Status { status, message });
    }
    Ok(resp)
}

/// Forwards decoded events until the byte stream ends or the receiver is dropped.
async fn pump<S, B, E>(stream: S, tx: &mpsc::Sender<ChangeEvent>) -> Pump
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error,
{
    let events = stream.eventsource();
    tokio::pin!(events);
    loop {
        let item = tokio::select! {
            () = tx.closed() => return Pump::ReceiverGone,
            item = events.next() => item,
        };
        let event = match item {
            None => return Pump::Disconnected,
            Some(Ok(event)) => event,
            Some(Err(err)) => {
                warn!(error = %err, "realtime feed stream error");
                return Pump::Disconnected;
            }
        };
        if event.data.is_empty() {
            continue;
        }
        let change = serde_json::from_str::<Value>(&event.data)
            .map_err(GatewayError::from)
            .and_then(ChangeEvent::from_wire);
        match change {
            Ok(change) => {
                if tx.send(change).await.is_err() {
                    return Pump::ReceiverGone;
                }
            }
            Err(err) => warn!(error = %err, event = %event.event, "undecodable change event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn pump_forwards_decoded_changes() {
        let body = concat!(
            ": keep-alive\n\n",
            "data: {\"type\":\"INSERT\",\"record\":{\"id\":1}}\n\n",
            "data: not json\n\n",
            "event: change\ndata: {\"type\":\"DELETE\",\"old_record\":{\"id\":1}}\n\n",
        );
        let bytes = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(body.as_bytes()))]);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = pump(bytes, &tx).await;
        assert!(matches!(outcome, Pump::Disconnected));
        assert_eq!(rx.recv().await, Some(ChangeEvent::Insert(json!({ "id": 1 }))));
        assert_eq!(rx.recv().await, Some(ChangeEvent::Delete(json!({ "id": 1 }))));
    }

    #[tokio::test]
    async fn pump_stops_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = pump(stream::pending::<Result<Bytes, std::io::Error>>(), &tx).await;
        assert!(matches!(outcome, Pump::ReceiverGone));
    }
}
