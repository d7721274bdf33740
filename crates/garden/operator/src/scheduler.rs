use std::time::Duration;

use garden_api::{config::ShootControllerArgs, shoot::ShootCrd};
use k8s_openapi::chrono::{DateTime, Utc};
use kube::Resource;

/// Returns the delay until the next reconciliation of the shoot.
pub fn next_delay(
    shoot: Option<&ShootCrd>,
    error_occurred: bool,
    config: &ShootControllerArgs,
) -> Duration {
    next_delay_at(Utc::now(), shoot, error_occurred, config)
}

/// Like [`next_delay`], but relative to the given point in time.
///
/// Reconciliations are aligned to the creation time of each shoot so that
/// shoots created at different times are spread over the whole sync period.
pub fn next_delay_at(
    now: DateTime<Utc>,
    shoot: Option<&ShootCrd>,
    error_occurred: bool,
    config: &ShootControllerArgs,
) -> Duration {
    if error_occurred {
        return config.retry_sync_period;
    }

    let period = shoot
        .filter(|_| config.respect_sync_period_overwrite)
        .and_then(ShootCrd::sync_period_overwrite)
        .filter(|period| *period >= ShootControllerArgs::MIN_SYNC_PERIOD_OVERWRITE)
        .unwrap_or(config.sync_period);

    let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
    if period_ms <= 0 {
        return period;
    }

    let created_at = shoot
        .and_then(|shoot| shoot.meta().creation_timestamp.as_ref())
        .map(|timestamp| timestamp.0)
        .unwrap_or(now);

    // euclidean, so shoots "created in the future" stay within the period as well
    let elapsed_ms = (now - created_at).num_milliseconds();
    let delay_ms = period_ms - elapsed_ms.rem_euclid(period_ms);
    Duration::from_millis(delay_ms.unsigned_abs())
}

#[cfg(test)]
mod tests {
    use garden_api::shoot::ShootSpec;
    use k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::{Duration as ChronoDuration, TimeZone},
    };
    use kube::api::ObjectMeta;

    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);
    const MINUTE: Duration = Duration::from_secs(60);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 0, 0).unwrap()
    }

    fn shoot(created_before: ChronoDuration, sync_period: Option<&str>) -> ShootCrd {
        ShootCrd {
            metadata: ObjectMeta {
                name: Some("dev".into()),
                namespace: Some("garden-core".into()),
                creation_timestamp: Some(Time(now() - created_before)),
                annotations: sync_period.map(|value| {
                    [(ShootCrd::ANNOTATION_SYNC_PERIOD.to_string(), value.to_string())].into()
                }),
                ..Default::default()
            },
            spec: ShootSpec::default(),
            status: None,
        }
    }

    fn config(respect_sync_period_overwrite: bool) -> ShootControllerArgs {
        ShootControllerArgs {
            sync_period: HOUR,
            retry_sync_period: Duration::from_secs(15),
            respect_sync_period_overwrite,
            ..Default::default()
        }
    }

    #[test]
    fn errors_use_the_retry_period() {
        let config = config(true);
        for shoot in [
            None,
            Some(shoot(ChronoDuration::minutes(150), None)),
            Some(shoot(ChronoDuration::minutes(7), Some("5m"))),
            Some(shoot(ChronoDuration::minutes(-10), Some("2h"))),
        ] {
            assert_eq!(
                next_delay_at(now(), shoot.as_ref(), true, &config),
                config.retry_sync_period,
            );
        }
    }

    #[test]
    fn aligns_to_the_creation_time() {
        let config = config(false);

        let data = shoot(ChronoDuration::minutes(150), None);
        assert_eq!(next_delay_at(now(), Some(&data), false, &config), 30 * MINUTE);

        // exactly on a period boundary
        let data = shoot(ChronoDuration::hours(3), None);
        assert_eq!(next_delay_at(now(), Some(&data), false, &config), HOUR);
    }

    #[test]
    fn stays_within_the_period() {
        let config = config(false);
        for seconds in [-7_200, -1, 0, 1, 59, 3_599, 3_600, 3_601, 86_399, 1_000_000] {
            let data = shoot(ChronoDuration::seconds(seconds), None);
            let delay = next_delay_at(now(), Some(&data), false, &config);
            assert!(delay > Duration::ZERO && delay <= HOUR, "{seconds}s: {delay:?}");
            // deterministic
            assert_eq!(delay, next_delay_at(now(), Some(&data), false, &config));
        }
    }

    #[test]
    fn future_creation_times_wrap_around() {
        let data = shoot(ChronoDuration::minutes(-10), None);
        assert_eq!(
            next_delay_at(now(), Some(&data), false, &config(false)),
            10 * MINUTE,
        );
    }

    #[test]
    fn missing_metadata_uses_the_full_period() {
        assert_eq!(next_delay_at(now(), None, false, &config(true)), HOUR);

        let mut data = shoot(ChronoDuration::zero(), None);
        data.metadata.creation_timestamp = None;
        assert_eq!(next_delay_at(now(), Some(&data), false, &config(true)), HOUR);
    }

    #[test]
    fn honors_respected_overwrites() {
        let data = shoot(ChronoDuration::minutes(7), Some("5m"));
        assert_eq!(
            next_delay_at(now(), Some(&data), false, &config(true)),
            3 * MINUTE,
        );
    }

    #[test]
    fn ignores_overwrites_unless_respected() {
        let data = shoot(ChronoDuration::minutes(7), Some("5m"));
        assert_eq!(
            next_delay_at(now(), Some(&data), false, &config(false)),
            53 * MINUTE,
        );
    }

    #[test]
    fn ignores_too_short_or_invalid_overwrites() {
        for value in ["30s", "59s", "soon", ""] {
            let data = shoot(ChronoDuration::minutes(7), Some(value));
            assert_eq!(
                next_delay_at(now(), Some(&data), false, &config(true)),
                53 * MINUTE,
                "{value:?}",
            );
        }

        // the lower bound itself is accepted
        let data = shoot(ChronoDuration::seconds(90), Some("1m"));
        assert_eq!(
            next_delay_at(now(), Some(&data), false, &config(true)),
            Duration::from_secs(30),
        );
    }
}
