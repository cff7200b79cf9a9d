//! Resource monitoring for operational logging.
//!
//! Samplers are pluggable so deployments with vendor GPU tooling can feed
//! real utilization in; the kernel ships a `/proc/stat` CPU sampler and a
//! fixed stub for the GPU slot.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;

/// One utilization reading in [0, 100].
pub trait ResourceSampler: Send {
    fn name(&self) -> &'static str;

    fn sample(&mut self) -> Result<f32>;
}

/// CPU utilization from consecutive `/proc/stat` aggregate lines.
///
/// The first sample has no baseline and reads 0.
pub struct ProcStatCpuSampler {
    previous: Option<(u64, u64)>,
}

impl ProcStatCpuSampler {
    pub fn new() -> Self {
        Self { previous: None }
    }

    fn read_totals() -> Result<(u64, u64)> {
        let raw = std::fs::read_to_string("/proc/stat").context("failed to read /proc/stat")?;
        let line = raw
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| anyhow!("/proc/stat has no aggregate cpu line"))?;
        parse_cpu_line(line)
    }
}

impl Default for ProcStatCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcStatCpuSampler {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn sample(&mut self) -> Result<f32> {
        let (total, idle) = Self::read_totals()?;
        let Some((prev_total, prev_idle)) = self.previous.replace((total, idle)) else {
            return Ok(0.0);
        };
        let total_delta = total.saturating_sub(prev_total);
        if total_delta == 0 {
            return Ok(0.0);
        }
        let idle_delta = idle.saturating_sub(prev_idle);
        let busy = (total_delta - idle_delta.min(total_delta)) as f32;
        Ok(busy / total_delta as f32 * 100.0)
    }
}

// "cpu  user nice system idle iowait irq softirq steal ..." in jiffies.
fn parse_cpu_line(line: &str) -> Result<(u64, u64)> {
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .context("non-numeric field in cpu line")?;
    if fields.len() < 4 {
        return Err(anyhow!("cpu line has {} fields, expected >= 4", fields.len()));
    }
    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok((total, idle))
}

/// Placeholder GPU sampler; always reads 0 until a vendor sampler is plugged
/// in.
pub struct StubGpuSampler;

impl ResourceSampler for StubGpuSampler {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn sample(&mut self) -> Result<f32> {
        Ok(0.0)
    }
}

/// Rolling averages over the last `window` samples per sampler.
pub struct ResourceMonitor {
    samplers: Vec<(Box<dyn ResourceSampler>, VecDeque<f32>)>,
    window: usize,
}

impl ResourceMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            samplers: Vec::new(),
            window: window.max(1),
        }
    }

    pub fn register(&mut self, sampler: Box<dyn ResourceSampler>) {
        self.samplers.push((sampler, VecDeque::new()));
    }

    /// Take one reading per sampler. A failing sampler is logged and keeps
    /// its previous history.
    pub fn tick(&mut self) {
        for (sampler, history) in &mut self.samplers {
            match sampler.sample() {
                Ok(value) => {
                    while history.len() >= self.window {
                        history.pop_front();
                    }
                    history.push_back(value.clamp(0.0, 100.0));
                }
                Err(e) => {
                    log::warn!("resource sampler '{}' failed: {e:#}", sampler.name());
                }
            }
        }
    }

    /// (name, rolling average) per registered sampler.
    pub fn averages(&self) -> Vec<(&'static str, f32)> {
        self.samplers
            .iter()
            .map(|(sampler, history)| {
                let avg = if history.is_empty() {
                    0.0
                } else {
                    history.iter().sum::<f32>() / history.len() as f32
                };
                (sampler.name(), avg)
            })
            .collect()
    }
}
