use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub expected_tasks: f64,
    /// Concurrent task slots needed to absorb the expected load.
    pub required_slots: f64,
}

/// Linear-trend projection of task arrivals and the capacity they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityForecast {
    pub generated_at: DateTime<Utc>,
    pub daily_counts: Vec<u32>,
    pub slope: f64,
    pub intercept: f64,
    pub mean_duration_secs: f64,
    /// Sum of declared capacity over operational agents.
    pub current_slots: u32,
    pub points: Vec<ForecastPoint>,
}

impl CapacityForecast {
    /// First projected day whose demand exceeds current capacity.
    pub fn shortfall_on(&self) -> Option<NaiveDate> {
        let slots = f64::from(self.current_slots);
        self.points
            .iter()
            .find(|p| p.required_slots > slots)
            .map(|p| p.date)
    }
}

/// Bucket `arrivals` into `history_days` daily counts ending with `now`'s day.
pub fn daily_counts(arrivals: &[DateTime<Utc>], now: DateTime<Utc>, history_days: i64) -> Vec<u32> {
    let days = history_days.max(1);
    let today = now.date_naive();
    let mut counts = vec![0u32; days as usize];
    for at in arrivals {
        let age = (today - at.date_naive()).num_days();
        if (0..days).contains(&age) {
            counts[(days - 1 - age) as usize] += 1;
        }
    }
    counts
}

/// Ordinary least squares over `(i, counts[i])`. Returns `(slope, intercept)`.
pub fn least_squares(counts: &[u32]) -> (f64, f64) {
    let n = counts.len() as f64;
    if counts.is_empty() {
        return (0.0, 0.0);
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = counts.iter().map(|&c| f64::from(c)).sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, &c) in counts.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (f64::from(c) - mean_y);
        sxx += dx * dx;
    }
    if sxx == 0.0 {
        return (0.0, mean_y);
    }
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

pub fn project(
    arrivals: &[DateTime<Utc>],
    now: DateTime<Utc>,
    history_days: i64,
    horizon_days: i64,
    mean_duration_secs: f64,
    current_slots: u32,
) -> CapacityForecast {
    let counts = daily_counts(arrivals, now, history_days);
    let (slope, intercept) = least_squares(&counts);
    let last = counts.len() as f64 - 1.0;
    let today = now.date_naive();

    let points = (1..=horizon_days.max(0))
        .map(|k| {
            let expected = (intercept + slope * (last + k as f64)).max(0.0);
            ForecastPoint {
                date: today + Duration::days(k),
                expected_tasks: expected,
                required_slots: expected * mean_duration_secs / SECONDS_PER_DAY,
            }
        })
        .collect();

    CapacityForecast {
        generated_at: now,
        daily_counts: counts,
        slope,
        intercept,
        mean_duration_secs,
        current_slots,
        points,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_least_squares_exact_line() {
        let (slope, intercept) = least_squares(&[2, 4, 6, 8]);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 2.0).abs() < 1e-9);
        assert_eq!(least_squares(&[5]), (0.0, 5.0));
    }

    #[test]
    fn test_daily_buckets() {
        let now = Utc::now();
        let arrivals = vec![now, now, now - Duration::days(1), now - Duration::days(40)];
        let counts = daily_counts(&arrivals, now, 30);
        assert_eq!(counts.len(), 30);
        assert_eq!(counts[29], 2);
        assert_eq!(counts[28], 1);
        assert_eq!(counts.iter().sum::<u32>(), 3);
    }

    #[test]
    fn test_projection_grows_with_trend() {
        let now = Utc::now();
        let mut arrivals = Vec::new();
        // One extra task per day over ten days: 1, 2, ..., 10.
        for age in 0..10i64 {
            for _ in 0..(10 - age) {
                arrivals.push(now - Duration::days(age));
            }
        }
        let forecast = project(&arrivals, now, 10, 30, 8_640.0, 2);
        assert_eq!(forecast.points.len(), 30);
        assert!((forecast.slope - 1.0).abs() < 1e-9);
        assert!((forecast.points[0].expected_tasks - 11.0).abs() < 1e-9);
        // 11 tasks × 8 640 s / 86 400 s = 1.1 slots
        assert!((forecast.points[0].required_slots - 1.1).abs() < 1e-9);
        // Demand crosses two slots around day ten of the horizon.
        let shortfall = forecast.shortfall_on().unwrap();
        assert!(shortfall >= forecast.points[9].date && shortfall <= forecast.points[10].date);
    }
}
