//! Over-allocation detection.

use chrono::NaiveDate;
use serde::Serialize;

use crate::histogram::DemandHistogram;

/// One resource-day whose demand exceeds capacity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverAllocation {
    pub resource_id: String,
    pub resource_name: String,
    pub date: NaiveDate,
    pub allocated_hours: f64,
    pub capacity: f64,
    pub excess_hours: f64,
    /// Every task with nonzero hours that day, first contribution first.
    pub conflicting_task_ids: Vec<String>,
}

impl OverAllocation {
    pub fn key(&self) -> (&str, NaiveDate) {
        (self.resource_id.as_str(), self.date)
    }
}

/// Flag every over-committed day. Sorted by date, then resource id.
pub fn detect_over_allocations(histogram: &DemandHistogram) -> Vec<OverAllocation> {
    let mut found: Vec<OverAllocation> = histogram
        .resources()
        .iter()
        .flat_map(|resource| {
            resource
                .days
                .iter()
                .filter(|(_, load)| load.is_over_allocated())
                .map(move |(&date, load)| {
                    let mut conflicting_task_ids: Vec<String> = Vec::new();
                    for (task_id, _) in &load.contributions {
                        if !conflicting_task_ids.contains(task_id) {
                            conflicting_task_ids.push(task_id.clone());
                        }
                    }
                    OverAllocation {
                        resource_id: resource.resource_id.clone(),
                        resource_name: resource.resource_name.clone(),
                        date,
                        allocated_hours: load.hours,
                        capacity: load.capacity,
                        excess_hours: load.hours - load.capacity,
                        conflicting_task_ids,
                    }
                })
        })
        .collect();
    found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.resource_id.cmp(&b.resource_id)));
    found
}
