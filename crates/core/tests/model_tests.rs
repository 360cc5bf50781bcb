// ═══════════════════════════════════════════════════════════════════
// Model Tests — TimePoint, DataKind, SyncState, WhatIfScenario,
// Valuation, ChartRange, Settings
// ═══════════════════════════════════════════════════════════════════

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::io::Write;

use share_valuation_core::errors::CoreError;
use share_valuation_core::models::scenario::WhatIfScenario;
use share_valuation_core::models::series::{latest_timestamp, Granularity, TimePoint};
use share_valuation_core::models::settings::Settings;
use share_valuation_core::models::sync::{DataKind, RefreshOutcome, SyncState, SyncStatus};
use share_valuation_core::models::valuation::{ChartRange, Valuation, ValuationPoint};

// ── TimePoint ───────────────────────────────────────────────────────

mod time_point {
    use super::*;

    #[test]
    fn serializes_timestamp_as_epoch_millis() {
        let ts = Utc.timestamp_millis_opt(1_735_776_000_123).unwrap();
        let json = serde_json::to_string(&TimePoint::new(ts, 251.5)).unwrap();
        assert_eq!(json, r#"{"timestamp":1735776000123,"value":251.5}"#);
    }

    #[test]
    fn deserializes_persisted_shape() {
        let point: TimePoint =
            serde_json::from_str(r#"{"timestamp":1735689600000,"value":0.79}"#).unwrap();
        assert_eq!(point.timestamp, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(point.value, 0.79);
    }

    #[test]
    fn on_date_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let point = TimePoint::on_date(date, 110.0);
        assert_eq!(point.timestamp, Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn well_formed_checks() {
        let ts = Utc::now();
        assert!(TimePoint::new(ts, 1.0).is_well_formed());
        assert!(!TimePoint::new(ts, f64::NAN).is_well_formed());
        assert!(!TimePoint::new(ts, f64::NEG_INFINITY).is_well_formed());
        let before_epoch = Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 0).unwrap();
        assert!(!TimePoint::new(before_epoch, 1.0).is_well_formed());
    }

    #[test]
    fn latest_timestamp_ignores_order() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let series = vec![
            TimePoint::new(t + Duration::days(2), 1.0),
            TimePoint::new(t, 1.0),
        ];
        assert_eq!(latest_timestamp(&series), Some(t + Duration::days(2)));
        assert_eq!(latest_timestamp(&[]), None);
    }
}

// ── Granularity ─────────────────────────────────────────────────────

mod granularity {
    use super::*;

    #[test]
    fn day_key_ignores_time_of_day() {
        let morning = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2025, 1, 2, 23, 59, 59).unwrap();
        let next = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(Granularity::Day.date_key(&morning), Granularity::Day.date_key(&evening));
        assert_ne!(Granularity::Day.date_key(&evening), Granularity::Day.date_key(&next));
    }

    #[test]
    fn minute_key_ignores_seconds() {
        let a = Utc.with_ymd_and_hms(2025, 1, 2, 14, 35, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 1, 2, 14, 35, 59).unwrap();
        let c = Utc.with_ymd_and_hms(2025, 1, 2, 14, 36, 0).unwrap();
        assert_eq!(Granularity::Minute.date_key(&a), Granularity::Minute.date_key(&b));
        assert_ne!(Granularity::Minute.date_key(&b), Granularity::Minute.date_key(&c));
    }
}

// ── DataKind / SyncState ────────────────────────────────────────────

mod sync_models {
    use super::*;

    #[test]
    fn slugs_are_stable() {
        let slugs: Vec<&str> = DataKind::ALL.iter().map(|k| k.slug()).collect();
        assert_eq!(
            slugs,
            vec![
                "current-price",
                "current-rate",
                "intraday-prices",
                "intraday-rates",
                "historical-prices",
                "historical-rates",
            ]
        );
    }

    #[test]
    fn granularity_per_kind() {
        assert_eq!(DataKind::CurrentPrice.granularity(), None);
        assert_eq!(DataKind::IntradayRate.granularity(), Some(Granularity::Minute));
        assert_eq!(DataKind::HistoricalPrice.granularity(), Some(Granularity::Day));
        assert!(DataKind::HistoricalRate.is_historical());
        assert!(!DataKind::IntradayPrice.is_historical());
    }

    #[test]
    fn new_state_is_idle_and_not_loading() {
        let state = SyncState::new(240.0, None);
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(!state.loading);
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn outcome_maps_to_status() {
        assert_eq!(RefreshOutcome::Skipped.status(), None);
        assert_eq!(RefreshOutcome::Updated.status(), Some(SyncStatus::Updated));
        assert_eq!(
            RefreshOutcome::FellBackToDefault.status(),
            Some(SyncStatus::FellBackToDefault)
        );
    }
}

// ── WhatIfScenario ──────────────────────────────────────────────────

mod scenario {
    use super::*;

    #[test]
    fn new_scenario_tracks_live_values() {
        let s = WhatIfScenario::new("What If Scenario 1", 0);
        assert!(s.use_live_price && s.use_live_rate);
        assert_eq!(s.effective_price(250.0), 250.0);
        assert_eq!(s.effective_rate(0.8), 0.8);
        assert_eq!(s.created_at, s.updated_at);
    }

    #[test]
    fn custom_values_replace_live() {
        let mut s = WhatIfScenario::new("x", 0);
        s.use_live_price = false;
        s.custom_price = Some(400.0);
        s.use_live_rate = false;
        s.custom_rate = Some(0.75);
        assert_eq!(s.effective_price(250.0), 400.0);
        assert_eq!(s.effective_rate(0.8), 0.75);
    }

    #[test]
    fn blank_custom_value_counts_as_zero() {
        let mut s = WhatIfScenario::new("x", 0);
        s.use_live_price = false;
        s.custom_price = None;
        assert_eq!(s.effective_price(250.0), 0.0);
        // Valuation: 10 shares × 0 = 0 in both currencies.
        let v = Valuation::compute(s.effective_price(250.0), s.effective_rate(0.8), 10);
        assert_eq!(v, Valuation { usd_value: 0.0, gbp_value: 0.0 });
    }

    #[test]
    fn ignored_custom_value_when_live_selected() {
        let mut s = WhatIfScenario::new("x", 0);
        s.custom_rate = Some(2.0);
        assert_eq!(s.effective_rate(0.8), 0.8);
    }

    #[test]
    fn json_round_trip_keeps_id_and_order() {
        let s = WhatIfScenario::new("What If Scenario 3", 2);
        let back: WhatIfScenario = serde_json::from_str(&serde_json::to_string(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }
}

// ── Valuation / ChartRange ──────────────────────────────────────────

mod valuation {
    use super::*;

    #[test]
    fn usd_and_gbp_from_price_rate_shares() {
        let v = Valuation::compute(250.0, 0.80, 10);
        assert_eq!(v.usd_value, 2500.0);
        assert!((v.gbp_value - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_shares_is_zero() {
        assert_eq!(Valuation::compute(250.0, 0.8, 0), Valuation::default());
    }

    #[test]
    fn chart_range_parse_and_display() {
        for (text, range) in [
            ("1W", ChartRange::OneWeek),
            ("1m", ChartRange::OneMonth),
            ("6M", ChartRange::SixMonths),
            ("1Y", ChartRange::OneYear),
            ("2y", ChartRange::TwoYears),
        ] {
            let parsed: ChartRange = text.parse().unwrap();
            assert_eq!(parsed, range);
            assert_eq!(parsed.to_string(), text.to_uppercase());
        }
        assert!(matches!("5Y".parse::<ChartRange>(), Err(CoreError::ValidationError(_))));
        assert_eq!(ChartRange::default(), ChartRange::TwoYears);
    }

    #[test]
    fn chart_range_filters_by_cutoff() {
        let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap();
        let point = |days_ago: i64| ValuationPoint {
            timestamp: now - Duration::days(days_ago),
            price: 1.0,
            rate: 1.0,
            usd_value: 1.0,
            gbp_value: 1.0,
        };
        let points = vec![point(400), point(40), point(6), point(0)];

        assert_eq!(ChartRange::OneWeek.filter(&points, now).len(), 2);
        assert_eq!(ChartRange::OneMonth.filter(&points, now).len(), 2);
        assert_eq!(ChartRange::SixMonths.filter(&points, now).len(), 3);
        assert_eq!(ChartRange::TwoYears.filter(&points, now).len(), 4);
    }
}

// ── Settings ────────────────────────────────────────────────────────

mod settings {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.symbol, "TSLA");
        assert_eq!(s.storage_namespace, "share-valuation");
        assert_eq!(s.default_price, 0.0);
        assert_eq!(s.default_rate, 0.78);
        assert_eq!(s.live_refresh().as_secs(), 300);
        assert_eq!(s.historical_refresh().as_secs(), 86_400);
        assert_eq!(s.revalidation().as_secs(), 604_800);
        assert_eq!(s.history_window(), Duration::days(730));
        assert_eq!(s.exchange_utc_offset_minutes, -300);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"symbol":"AAPL","api_keys":{{"alphavantage":"demo"}}}}"#).unwrap();
        let s = Settings::load_from_path(file.path()).unwrap();
        assert_eq!(s.symbol, "AAPL");
        assert_eq!(s.api_key("alphavantage"), Some("demo"));
        assert_eq!(s.default_rate, 0.78);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Settings::load_from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(Settings::load_from_path(file.path()), Err(CoreError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            Settings { symbol: "  ".into(), ..Settings::default() },
            Settings { live_refresh_secs: 0, ..Settings::default() },
            Settings { history_days: 0, ..Settings::default() },
            Settings { history_days: i64::MAX, ..Settings::default() },
            Settings { history_days: 36_501, ..Settings::default() },
            Settings { exchange_utc_offset_minutes: 1440, ..Settings::default() },
            Settings { exchange_utc_offset_minutes: i32::MIN, ..Settings::default() },
            Settings { historical_refresh_secs: u64::MAX, ..Settings::default() },
            Settings { default_rate: f64::NAN, ..Settings::default() },
            Settings { default_price: -1.0, ..Settings::default() },
        ];
        for s in bad {
            assert!(matches!(s.validate(), Err(CoreError::Config(_))), "{s:?}");
        }
    }

    #[test]
    fn validate_accepts_bounds() {
        let s = Settings {
            history_days: 36_500,
            exchange_utc_offset_minutes: -1439,
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
        assert_eq!(s.history_window(), chrono::Duration::days(36_500));
    }

    #[test]
    fn blank_api_key_is_absent() {
        let mut s = Settings::default();
        s.api_keys.insert("alphavantage".into(), "   ".into());
        assert_eq!(s.api_key("alphavantage"), None);
    }
}
