//! Periodic process and system sampling.
//!
//! # Responsibilities
//! - Capture CPU time, resident memory, uptime, load averages and system
//!   memory on a fixed period
//! - Publish each snapshot as a system record, independent of request traffic
//!
//! # Design Decisions
//! - Sampling errors skip the tick and are reported on the console; the loop
//!   keeps its schedule
//! - The loop stops on the shutdown broadcast, exactly like the other
//!   background tasks
//! - The first sample is taken one period after start, not at start
//! - Uptime is the age of the process: its age when the source is built plus
//!   the monotonic time since. Platforms that do not expose the process start
//!   time count from source construction instead

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::observability::error::SampleError;
use crate::observability::record::{
    CpuUsage, Level, LogRecord, MemoryUsage, Payload, Scope, ServiceIdentity, SystemRecord,
};
use crate::observability::router::EventRouter;

/// Source of system snapshots.
pub trait MetricsSource: Send + 'static {
    fn sample(&mut self) -> Result<SystemRecord, SampleError>;
}

/// Reads the current process and host via the operating system.
pub struct ProcessMetrics {
    started: Instant,
    age_at_start: Duration,
}

impl ProcessMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            age_at_start: os::process_age().unwrap_or_default(),
        }
    }

    /// Seconds since the process started.
    pub fn uptime(&self) -> f64 {
        (self.age_at_start + self.started.elapsed()).as_secs_f64()
    }
}

impl Default for ProcessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for ProcessMetrics {
    fn sample(&mut self) -> Result<SystemRecord, SampleError> {
        let (cpu_usage, peak_resident_bytes) = os::rusage()?;
        let resident_bytes = os::resident_bytes().unwrap_or(peak_resident_bytes);
        let (free_memory_bytes, total_memory_bytes) = os::system_memory()?;

        Ok(SystemRecord {
            cpu_usage,
            memory_usage: MemoryUsage {
                resident_bytes,
                peak_resident_bytes,
            },
            uptime_seconds: self.uptime(),
            load_average: os::load_average()?,
            free_memory_bytes,
            total_memory_bytes,
        })
    }
}

/// Background task publishing a system record every `interval`.
pub struct SystemSampler {
    router: Arc<EventRouter>,
    identity: Arc<ServiceIdentity>,
    interval: Duration,
    source: Box<dyn MetricsSource>,
}

impl SystemSampler {
    pub fn new(
        router: Arc<EventRouter>,
        identity: Arc<ServiceIdentity>,
        interval: Duration,
        source: Box<dyn MetricsSource>,
    ) -> Self {
        Self {
            router,
            identity,
            interval,
            source,
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "System sampler starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = shutdown.recv() => {
                    tracing::debug!("System sampler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Take one sample and publish it. Failures are reported and skipped.
    pub fn tick(&mut self) {
        match self.source.sample() {
            Ok(snapshot) => {
                let record = LogRecord::new(
                    &self.identity,
                    Level::Info,
                    "System metrics collected",
                    Scope::default(),
                    Payload::System(snapshot),
                );
                self.router.emit(&record);
            }
            Err(e) => {
                tracing::warn!(error = %e, "System metrics sample failed; skipping tick");
            }
        }
    }
}

/// Host name of the machine, if the OS reports one.
pub fn hostname() -> Option<String> {
    os::hostname()
}

#[cfg(unix)]
mod os {
    use super::*;
    use nix::sys::resource::{getrusage, UsageWho};

    fn os_error(call: &'static str, errno: nix::errno::Errno) -> SampleError {
        SampleError::Os {
            call,
            source: std::io::Error::from(errno),
        }
    }

    pub(super) fn rusage() -> Result<(CpuUsage, u64), SampleError> {
        let usage = getrusage(UsageWho::RUSAGE_SELF).map_err(|e| os_error("getrusage", e))?;

        let micros = |secs: i64, usecs: i64| (secs.max(0) as u64) * 1_000_000 + usecs.max(0) as u64;
        let user = usage.user_time();
        let system = usage.system_time();
        let cpu = CpuUsage {
            user_micros: micros(user.tv_sec() as i64, user.tv_usec() as i64),
            system_micros: micros(system.tv_sec() as i64, system.tv_usec() as i64),
        };

        // ru_maxrss is reported in kilobytes on Linux and bytes on macOS.
        let max_rss = usage.max_rss().max(0) as u64;
        let peak = if cfg!(target_os = "macos") { max_rss } else { max_rss * 1024 };
        Ok((cpu, peak))
    }

    #[cfg(target_os = "linux")]
    pub(super) fn load_average() -> Result<Vec<f64>, SampleError> {
        let info = nix::sys::sysinfo::sysinfo().map_err(|e| os_error("sysinfo", e))?;
        let (one, five, fifteen) = info.load_average();
        Ok(vec![one, five, fifteen])
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn load_average() -> Result<Vec<f64>, SampleError> {
        Err(SampleError::Unsupported("load average"))
    }

    #[cfg(target_os = "linux")]
    pub(super) fn system_memory() -> Result<(u64, u64), SampleError> {
        let info = nix::sys::sysinfo::sysinfo().map_err(|e| os_error("sysinfo", e))?;
        Ok((info.ram_unused(), info.ram_total()))
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn system_memory() -> Result<(u64, u64), SampleError> {
        Err(SampleError::Unsupported("system memory query"))
    }

    #[cfg(target_os = "linux")]
    fn sysconf(var: nix::unistd::SysconfVar) -> Option<u64> {
        match nix::unistd::sysconf(var) {
            Ok(Some(value)) if value > 0 => Some(value as u64),
            _ => None,
        }
    }

    #[cfg(target_os = "linux")]
    pub(super) fn resident_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * sysconf(nix::unistd::SysconfVar::PAGE_SIZE)?)
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn resident_bytes() -> Option<u64> {
        None
    }

    /// Host uptime minus the process start time from `/proc/self/stat`.
    #[cfg(target_os = "linux")]
    pub(super) fn process_age() -> Option<Duration> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // Fields after the parenthesised command name start at `state` (3);
        // `starttime` (22) is in clock ticks since boot.
        let fields = &stat[stat.rfind(')')? + 1..];
        let start_ticks: f64 = fields.split_whitespace().nth(19)?.parse().ok()?;
        let ticks_per_sec = sysconf(nix::unistd::SysconfVar::CLK_TCK)? as f64;

        let host_uptime: f64 = std::fs::read_to_string("/proc/uptime")
            .ok()?
            .split_whitespace()
            .next()?
            .parse()
            .ok()?;
        let age = host_uptime - start_ticks / ticks_per_sec;
        (age >= 0.0).then(|| Duration::from_secs_f64(age))
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn process_age() -> Option<Duration> {
        None
    }

    pub(super) fn hostname() -> Option<String> {
        let name = nix::unistd::gethostname().ok()?;
        let name = name.to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    }
}

#[cfg(not(unix))]
mod os {
    use super::*;

    pub(super) fn rusage() -> Result<(CpuUsage, u64), SampleError> {
        Err(SampleError::Unsupported("process resource usage"))
    }

    pub(super) fn load_average() -> Result<Vec<f64>, SampleError> {
        Err(SampleError::Unsupported("load average"))
    }

    pub(super) fn system_memory() -> Result<(u64, u64), SampleError> {
        Err(SampleError::Unsupported("system memory query"))
    }

    pub(super) fn resident_bytes() -> Option<u64> {
        None
    }

    pub(super) fn process_age() -> Option<Duration> {
        None
    }

    pub(super) fn hostname() -> Option<String> {
        std::env::var("COMPUTERNAME").ok()
    }
}
