use cadence_core::trigger::{PeriodUnit, Trigger};
use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone};
use proptest::prelude::*;

fn unit() -> impl Strategy<Value = PeriodUnit> {
    prop_oneof![
        Just(PeriodUnit::Millisecond),
        Just(PeriodUnit::Second),
        Just(PeriodUnit::Minute),
        Just(PeriodUnit::Hour),
        Just(PeriodUnit::Day),
        Just(PeriodUnit::Week),
        Just(PeriodUnit::Month),
        Just(PeriodUnit::Year),
    ]
}

fn start() -> impl Strategy<Value = DateTime<FixedOffset>> {
    // 2000-01-01 .. 2040-01-01, offsets -12h .. +14h in quarter hours.
    (946_684_800i64..2_208_988_800i64, -48i32..=56i32).prop_map(|(secs, quarters)| {
        FixedOffset::east_opt(quarters * 900)
            .unwrap()
            .timestamp_opt(secs, 0)
            .unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

    /// Bounded triggers produce exactly repeat_count + 1 fire times, the
    /// i-th equal to start + i * period, all in the start's offset.
    #[test]
    fn bounded_trigger_yields_exact_sequence(
        start in start(),
        period in 1i64..500,
        unit in unit(),
        repeat in 0i64..40,
    ) {
        let mut t = Trigger::new(start, period, unit, repeat, None).unwrap();
        let fires: Vec<_> = std::iter::from_fn(|| t.next_fire_time()).take(1_000).collect();

        prop_assert_eq!(fires.len() as i64, repeat + 1);
        prop_assert_eq!(t.current_repeat_count(), repeat);
        prop_assert_eq!(fires[0], start);
        for (i, fire) in fires.iter().enumerate() {
            prop_assert_eq!(Some(*fire), t.fire_time_at(i as i64));
            prop_assert_eq!(fire.offset(), start.offset());
        }
        prop_assert!(fires.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(t.next_fire_time().is_none());
        prop_assert_eq!(t.current_repeat_count(), repeat);
    }

    /// Fixed-length units are plain duration arithmetic.
    #[test]
    fn fixed_units_are_exact_offsets(
        start in start(),
        period in 1i64..10_000,
        n in 0i64..1_000,
    ) {
        let t = Trigger::new(start, period, PeriodUnit::Second, -1, None).unwrap();
        prop_assert_eq!(t.fire_time_at(n), Some(start + TimeDelta::seconds(n * period)));
    }

    /// An end time caps an indefinite trigger exactly like a bounded one.
    #[test]
    fn end_time_caps_indefinite_trigger(
        start in start(),
        period in 1i64..120,
        span_minutes in 0i64..2_000,
    ) {
        let end = start + TimeDelta::minutes(span_minutes);
        let mut t = Trigger::new(start, period, PeriodUnit::Minute, -1, Some(end)).unwrap();
        let fires: Vec<_> = std::iter::from_fn(|| t.next_fire_time()).take(10_000).collect();

        prop_assert_eq!(fires.len() as i64, span_minutes / period + 1);
        prop_assert!(fires.iter().all(|f| *f <= end));
        prop_assert_eq!(t.current_repeat_count(), fires.len() as i64 - 1);
    }
}
