use std::env;
use std::path::Path;
use std::process::Command;

use tracing::info;

pub const FORCE_CPU_ENV: &str = "SQLRAG_FORCE_CPU";
pub const GPU_LAYERS_ENV: &str = "SQLRAG_GPU_LAYERS";

/// Layer count llama.cpp reads as "offload everything".
pub const ALL_LAYERS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Metal,
    Cuda,
    Vulkan,
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Metal => "metal",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Vulkan => "vulkan",
            DeviceKind::Cpu => "cpu",
        }
    }
}

/// Where generation weights go. `gpu_layers == 0` means host memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePlan {
    pub kind: DeviceKind,
    pub gpu_layers: i32,
}

impl DevicePlan {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            gpu_layers: 0,
        }
    }

    #[cfg_attr(not(feature = "llama"), allow(dead_code))]
    pub fn is_accelerated(&self) -> bool {
        self.kind != DeviceKind::Cpu && self.gpu_layers != 0
    }
}

/// Picks an accelerator when one is present. `force_cpu` and the
/// `SQLRAG_FORCE_CPU` variable both pin generation to the host.
pub fn plan_device(force_cpu: bool) -> DevicePlan {
    if force_cpu || env_flag(FORCE_CPU_ENV) {
        info!("gpu acceleration disabled (cpu mode forced)");
        return DevicePlan::cpu();
    }

    let kind = detect_accelerator();
    if kind == DeviceKind::Cpu {
        info!("no gpu acceleration available, using cpu");
        return DevicePlan::cpu();
    }

    let gpu_layers = env::var(GPU_LAYERS_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<i32>().ok())
        .unwrap_or(ALL_LAYERS);

    DevicePlan { kind, gpu_layers }
}

pub fn detect_accelerator() -> DeviceKind {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        return DeviceKind::Metal;
    }
    if cfg!(target_os = "linux") && has_nvidia_gpu() {
        return DeviceKind::Cuda;
    }
    if has_vulkan() {
        return DeviceKind::Vulkan;
    }
    DeviceKind::Cpu
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn has_nvidia_gpu() -> bool {
    let dev_dir = Path::new("/dev");
    if dev_dir.join("nvidia0").exists() || dev_dir.join("nvidiactl").exists() {
        return true;
    }

    // WSL exposes the driver through a shared library instead of device nodes.
    if Path::new("/usr/lib/wsl/lib/libcuda.so.1").exists() {
        return true;
    }

    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn has_vulkan() -> bool {
    Command::new("vulkaninfo")
        .arg("--summary")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_cpu_plan_offloads_nothing() {
        let plan = plan_device(true);
        assert_eq!(plan, DevicePlan::cpu());
        assert!(!plan.is_accelerated());
    }

    #[test]
    fn accelerated_plan_requires_layers_and_device() {
        let plan = DevicePlan {
            kind: DeviceKind::Cuda,
            gpu_layers: ALL_LAYERS,
        };
        assert!(plan.is_accelerated());

        let no_layers = DevicePlan {
            kind: DeviceKind::Cuda,
            gpu_layers: 0,
        };
        assert!(!no_layers.is_accelerated());
    }

    #[test]
    fn flag_values_are_case_insensitive() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
    }

    #[test]
    fn detection_returns_a_known_device() {
        assert!(matches!(
            detect_accelerator(),
            DeviceKind::Metal | DeviceKind::Cuda | DeviceKind::Vulkan | DeviceKind::Cpu
        ));
    }
}
