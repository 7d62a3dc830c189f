use std::{collections::HashMap, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::types::{RenderMethod, SizeClass};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSuccessRecord {
    pub success_count: u32,
    pub total_attempts: u32,
    /// Halves toward each new successful sample; `None` until the first success.
    pub average_render_time_ms: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

impl MethodSuccessRecord {
    fn new() -> Self {
        Self {
            success_count: 0,
            total_attempts: 0,
            average_render_time_ms: None,
            last_used: OffsetDateTime::now_utc(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(self.total_attempts)
    }
}

/// Learned outcomes per `(method, size class)`.
#[derive(Debug, Clone, Default)]
pub struct MethodStatistics {
    records: HashMap<(RenderMethod, SizeClass), MethodSuccessRecord>,
}

impl MethodStatistics {
    pub fn record_success(&mut self, method: RenderMethod, size: SizeClass, elapsed: Duration) {
        let sample = elapsed.as_nanos() as f64 / 1_000_000.0;
        let record = self
            .records
            .entry((method, size))
            .or_insert_with(MethodSuccessRecord::new);
        record.success_count += 1;
        record.total_attempts += 1;
        record.average_render_time_ms = Some(match record.average_render_time_ms {
            Some(previous) => (previous + sample) / 2.0,
            None => sample,
        });
        record.last_used = OffsetDateTime::now_utc();
    }

    pub fn record_failure(&mut self, method: RenderMethod, size: SizeClass) {
        let record = self
            .records
            .entry((method, size))
            .or_insert_with(MethodSuccessRecord::new);
        record.total_attempts += 1;
        record.last_used = OffsetDateTime::now_utc();
    }

    pub fn record(&self, method: RenderMethod, size: SizeClass) -> Option<&MethodSuccessRecord> {
        self.records.get(&(method, size))
    }

    /// Highest success rate wins, ties go to the faster average. Without any
    /// successful history the size class default applies.
    pub fn preferred(&self, size: SizeClass) -> RenderMethod {
        let mut best: Option<(RenderMethod, f64, f64)> = None;
        for method in RenderMethod::CHAIN {
            let Some(record) = self.records.get(&(method, size)) else {
                continue;
            };
            let rate = record.success_rate();
            let average = record.average_render_time_ms.unwrap_or(f64::INFINITY);
            let better = match best {
                None => true,
                Some((_, best_rate, best_average)) => {
                    rate > best_rate || (rate == best_rate && average < best_average)
                }
            };
            if better {
                best = Some((method, rate, average));
            }
        }

        match best {
            Some((method, rate, _)) if rate > 0.0 => method,
            _ => default_preference(size),
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn default_preference(size: SizeClass) -> RenderMethod {
    match size {
        SizeClass::Small | SizeClass::Medium => RenderMethod::DirectParseAndDraw,
        SizeClass::Large => RenderMethod::RemoteConversionService,
    }
}
