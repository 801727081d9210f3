use std::fmt::Write;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::dag::{Dag, Task, describe};
use crate::key::Key;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    /// When the last attempt was submitted.
    pub start: Instant,
    /// Time from submission of the last attempt until its completion was
    /// observed by the driver.
    pub duration: Duration,
    pub attempts: u32,
    pub category: String,
}

/// Execution metrics collected by [`Driver::execute`](super::Driver::execute).
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Per key, in order of completion.
    pub execution_times: IndexMap<Key, TaskExecution>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, task: &Task, attempts: u32, start: Instant, duration: Duration) {
        self.execution_times.insert(
            task.key.clone(),
            TaskExecution {
                start,
                duration,
                attempts,
                category: task.category().to_string(),
            },
        );
    }

    /// Number of submissions that were retries.
    pub fn retries(&self) -> u32 {
        self.execution_times
            .values()
            .map(|exec| exec.attempts.saturating_sub(1))
            .sum()
    }

    /// Total time spent per category, slowest first.
    pub fn by_category(&self) -> Vec<(&str, Duration)> {
        let mut totals: IndexMap<&str, Duration> = IndexMap::new();
        for exec in self.execution_times.values() {
            *totals.entry(exec.category.as_str()).or_default() += exec.duration;
        }

        let mut totals: Vec<_> = totals.into_iter().collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1));
        totals
    }

    /// Renders the graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Resolved without a work unit
    /// * **Grey**: No result
    pub fn render_mermaid(&self, dag: &Dag) -> String {
        let mut out = String::new();
        _ = self.write_mermaid(&mut out, dag);
        out
    }

    fn write_mermaid(&self, f: &mut String, dag: &Dag) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let (min_time, max_time) = self.time_range();

        for (index, key) in dag.keys().enumerate() {
            let name = key.to_string().replace('"', "\\\"");

            let (label_extra, color_code) = match self.execution_times.get(key) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    let (r, g, b) = gradient(t);
                    (
                        format!("{:.2?}", exec.duration),
                        format!("#{r:02X}{g:02X}{b:02X}"),
                    )
                }
                None if dag.has_result(key) => ("in place".to_string(), "#ADD8E6".to_string()),
                None => ("pending".to_string(), "#D3D3D3".to_string()),
            };

            let kind = dag.form(key).map(describe).unwrap_or_default();
            writeln!(f, "    {index}[\"{name}\\n{kind}\\n{label_extra}\"]")?;
            writeln!(f, "    style {index} fill:{color_code}")?;

            if dag.is_target(key) {
                writeln!(f, "    {index} --> Targets")?;
            }
        }

        writeln!(f, "    Targets[Targets]")?;

        let position: IndexMap<&Key, usize> =
            dag.keys().enumerate().map(|(index, key)| (key, index)).collect();

        for (index, key) in dag.keys().enumerate() {
            for child in dag.children(key) {
                if let Some(source) = position.get(child) {
                    writeln!(f, "    {source} --> {index}")?;
                }
            }
        }

        Ok(())
    }

    fn time_range(&self) -> (f64, f64) {
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for exec in self.execution_times.values() {
            let secs = exec.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            // Nothing ran
            min_time = 0.0;
            max_time = 0.0;
        }

        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        (min_time, max_time)
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn gradient(t: f64) -> (u8, u8, u8) {
    let t = t.clamp(0.0, 1.0);

    if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    }
}
