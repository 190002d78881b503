use crate::runtime::CpuSample;

/// CPU utilization between two samples, scaled by the number of online CPUs.
///
/// Missing counters, counters that went backwards and an idle system clock all
/// read as 0.0.
pub fn cpu_percent(current: &CpuSample, previous: &CpuSample) -> f64 {
    let (Some(cpu), Some(prev_cpu)) = (current.total_usage, previous.total_usage) else {
        return 0.0;
    };
    let (Some(system), Some(prev_system)) = (current.system_usage, previous.system_usage) else {
        return 0.0;
    };

    let cpu_delta = cpu as f64 - prev_cpu as f64;
    let system_delta = system as f64 - prev_system as f64;
    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }

    let online = current.online_cpus.filter(|n| *n > 0).unwrap_or(1);
    let pct = (cpu_delta / system_delta) * 100.0 * f64::from(online);
    if pct.is_finite() { pct } else { 0.0 }
}
