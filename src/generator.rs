//! Synthetic clickstream events.
//!
//! Generation is driven entirely by the supplied RNG and clock, so the same
//! seed yields the same events.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::{Builder, Uuid};

/// Event types emitted by the generator.
pub const EVENT_TYPES: [&str; 3] = ["view_product", "add_to_cart", "checkout"];

const DOMAINS: [&str; 4] = ["shop.example.com", "www.example.org", "store.example.net", "example.com"];
const PAGES: [&str; 6] = ["", "product", "category", "cart", "search", "deals"];

/// Default events per second.
pub const DEFAULT_RATE: f64 = 5.0;

/// Delay between events for a rate in events per second.
pub fn interval_for(rate: f64) -> Duration {
    if rate.is_finite() && rate > 0.0 {
        Duration::from_secs_f64(1.0 / rate)
    } else {
        Duration::from_secs_f64(1.0 / DEFAULT_RATE)
    }
}

fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    Builder::from_random_bytes(rng.random()).into_uuid()
}

fn random_url<R: Rng + ?Sized>(rng: &mut R) -> String {
    let domain = DOMAINS[rng.random_range(0..DOMAINS.len())];
    let page = PAGES[rng.random_range(0..PAGES.len())];
    format!("https://{domain}/{page}")
}

fn random_ipv4<R: Rng + ?Sized>(rng: &mut R) -> String {
    let [a, b, c, d]: [u8; 4] = rng.random();
    format!("{}.{b}.{c}.{d}", a.max(1))
}

/// One clickstream event as the producer would send it.
pub fn clickstream_event<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Value {
    json!({
        "user_id": random_uuid(rng).to_string(),
        "event_type": EVENT_TYPES[rng.random_range(0..EVENT_TYPES.len())],
        "timestamp": now.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        "page_url": random_url(rng),
        "product_id": rng.random_range(1..=1000),
        "session_id": random_uuid(rng).to_string(),
        "ip_address": random_ipv4(rng),
    })
}

/// Publish generated events to the configured topic until cancelled or
/// `limit` events have been sent.
#[cfg(feature = "kafka")]
pub async fn run_producer(
    config: &crate::config::SourceConfig,
    rate: f64,
    limit: Option<u64>,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<u64, crate::error::SourceError> {
    use crate::source::kafka::KafkaProducer;
    use tracing::{error, info};

    let producer = KafkaProducer::connect(config)?;
    let mut ticker = tokio::time::interval(interval_for(rate));
    let mut sent = 0u64;

    info!(status = "producer_started", topic = %config.topic, rate, "Producer started");

    while limit.is_none_or(|limit| sent < limit) {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let event = clickstream_event(&mut rand::rng(), Utc::now());
        let key = event["user_id"].as_str().unwrap_or_default().to_string();
        match producer.send(&key, event.to_string().as_bytes()).await {
            Ok(()) => sent += 1,
            Err(error) => error!(event = "delivery_failed", %error, "Delivery failed"),
        }
    }

    producer.flush(Duration::from_secs(10))?;
    info!(sent, "Producer stopped");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Validator, decode};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_event_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let event = clickstream_event(&mut rng, Utc::now());
        let object = event.as_object().unwrap();

        for field in [
            "user_id",
            "event_type",
            "timestamp",
            "page_url",
            "product_id",
            "session_id",
            "ip_address",
        ] {
            assert!(object.contains_key(field), "missing {field}");
        }
        assert!(EVENT_TYPES.contains(&object["event_type"].as_str().unwrap()));
        let product_id = object["product_id"].as_i64().unwrap();
        assert!((1..=1000).contains(&product_id));
        assert!(Uuid::parse_str(object["user_id"].as_str().unwrap()).is_ok());
        assert_eq!(object["ip_address"].as_str().unwrap().split('.').count(), 4);
    }

    #[test]
    fn test_same_seed_same_events() {
        let now = Utc::now();
        let a = clickstream_event(&mut StdRng::seed_from_u64(42), now);
        let b = clickstream_event(&mut StdRng::seed_from_u64(42), now);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_events_validate() {
        let mut rng = StdRng::seed_from_u64(1);
        let validator = Validator::new();
        for _ in 0..100 {
            let payload = clickstream_event(&mut rng, Utc::now()).to_string();
            let raw = decode(Some(payload.as_bytes())).unwrap();
            assert!(validator.validate(raw).is_ok());
        }
    }

    #[test]
    fn test_interval_for_rate() {
        assert_eq!(interval_for(5.0), Duration::from_millis(200));
        assert_eq!(interval_for(0.0), Duration::from_millis(200));
        assert_eq!(interval_for(10.0), Duration::from_millis(100));
    }
}
