//! Property tests for the replay invariants.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use replaylab_core::bus::EventBus;
use replaylab_core::data::{
    DataInjector, MemoryBarStore, SeriesKey, WindowError, WindowedRepository,
};
use replaylab_core::domain::{Bar, Timeframe};
use replaylab_core::time::{parse_utc, DateRange};

fn hourly_bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let open =
                parse_utc("2024-01-02T00:00:00Z").unwrap() + ChronoDuration::hours(i as i64);
            Bar {
                symbol: "EURUSD".into(),
                broker: "paper".into(),
                timeframe: Timeframe::H1,
                timestamp_open: open,
                timestamp_close: open + ChronoDuration::hours(1),
                open: 1.0,
                high: 1.1,
                low: 0.9,
                close: 1.05,
                volume: 100.0,
                spread: None,
            }
        })
        .collect()
}

proptest! {
    /// Whatever order updates arrive in, the watermark never moves
    /// backward: each update either advances it or is rejected, and the
    /// final watermark equals the running maximum of accepted updates.
    #[test]
    fn watermark_never_regresses(offsets in prop::collection::vec(0i64..500, 1..40)) {
        let store = MemoryBarStore::new();
        let key = SeriesKey::new("EURUSD", "paper", Timeframe::H1);
        let repo = WindowedRepository::new(Arc::new(store));
        let base = parse_utc("2024-01-02T00:00:00Z").unwrap();

        let mut high_water = None::<i64>;
        for offset in offsets {
            let requested = base + ChronoDuration::minutes(offset);
            let outcome = repo.set_visible_until(&key, requested);
            match high_water {
                Some(current) if offset < current => {
                    prop_assert!(
                        matches!(outcome, Err(WindowError::WatermarkRegression { .. })),
                        "expected WatermarkRegression error"
                    );
                }
                _ => {
                    prop_assert!(outcome.is_ok());
                    high_water = Some(high_water.map_or(offset, |h| h.max(offset)));
                }
            }
            let expected = high_water.map(|h| base + ChronoDuration::minutes(h));
            prop_assert_eq!(repo.watermark(&key), expected);
        }
    }

    /// For any series length and warm-up count, the injector yields
    /// exactly `n - warmup` bars (saturating at zero) while the watermark
    /// still covers the whole series.
    #[test]
    fn yielded_count_matches_series_minus_warmup(n in 0usize..40, warmup in 0usize..60) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = MemoryBarStore::new();
            let key = SeriesKey::new("EURUSD", "paper", Timeframe::H1);
            store.insert(key.clone(), hourly_bars(n));
            let repository = Arc::new(WindowedRepository::new(Arc::new(store)));
            let bus = Arc::new(EventBus::new());
            bus.start().await.unwrap();

            let range = DateRange::new(
                parse_utc("2024-01-01T00:00:00Z").unwrap(),
                parse_utc("2024-02-01T00:00:00Z").unwrap(),
            );
            let injector = DataInjector::new(Arc::clone(&bus), Arc::clone(&repository));
            let yielded = injector
                .inject_bars(&key, &range, warmup, |_| async {})
                .await
                .unwrap();

            assert_eq!(yielded, n.saturating_sub(warmup));
            assert_eq!(repository.visible_count(&key), n);
            bus.stop().await;
        });
    }
}
