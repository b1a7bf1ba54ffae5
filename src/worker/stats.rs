use serde::{Serialize, Serializer, ser::SerializeStruct};
use sysinfo::{Disks, System};

use super::types::{LoadAverage, SystemStats, Usage};

const MB: u64 = 1024 * 1024;

impl Usage {
    pub fn from_bytes(total: u64, used: u64) -> Self {
        Usage {
            total: total / MB,
            used: used / MB,
        }
    }

    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f32 / self.total as f32 * 100.0
    }
}

impl Serialize for Usage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Usage", 3)?;
        state.serialize_field("total", &format!("{} MB", self.total))?;
        state.serialize_field("used", &format!("{} MB", self.used))?;
        state.serialize_field("percent", &format!("{:.2}%", self.percent()))?;
        state.end()
    }
}

pub(crate) fn percent<S>(value: &f32, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{:.2}%", value))
}

/// Sample the host. `sysinfo` must have been refreshed by the caller.
pub fn get_stats(sysinfo: &System, task_count: u64) -> SystemStats {
    let load = System::load_average();

    SystemStats {
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        total_cpus: sysinfo.cpus().len() as u64,
        cpu_usage: sysinfo.global_cpu_usage(),
        memory: Usage::from_bytes(sysinfo.total_memory(), sysinfo.used_memory()),
        swap: Usage::from_bytes(sysinfo.total_swap(), sysinfo.used_swap()),
        disk: disk_usage(&Disks::new_with_refreshed_list()),
        load: LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        },
        task_count,
    }
}

fn disk_usage(disks: &Disks) -> Usage {
    let (total, available) = disks.iter().fold((0u64, 0u64), |(total, available), disk| {
        (total + disk.total_space(), available + disk.available_space())
    });
    Usage::from_bytes(total, total.saturating_sub(available))
}
