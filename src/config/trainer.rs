//! Trainer invocation model
//!
//! The trainer is an opaque executable with a fixed flag vocabulary. This
//! module types that vocabulary and renders it into an argument vector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Graph construction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// Functional training step with static input shapes
    #[default]
    StaticShape,
    /// Loss-scale training cell with static input shapes
    StaticCell,
}

/// Automatic mixed precision level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AmpLevel {
    /// Full fp32
    #[default]
    O0,
    /// Selected ops in fp16
    O1,
    /// Most ops in fp16, batch norm in fp32
    O2,
    /// Everything in fp16
    O3,
}

/// Loss scaler mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LossScaler {
    /// Fixed scale value
    #[default]
    Static,
    /// Scale adjusted on overflow
    Dynamic,
    /// No loss scaling
    None,
}

/// Optimizer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    /// Nesterov SGD
    Sgd,
    /// Nesterov momentum
    #[default]
    Momentum,
    /// Adam
    Adam,
}

/// Device target identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceTarget {
    /// Ascend NPU
    #[default]
    Ascend,
    /// CUDA GPU
    #[serde(rename = "GPU")]
    Gpu,
    /// Host CPU
    #[serde(rename = "CPU")]
    Cpu,
}

macro_rules! flag_display {
    ($ty:ty, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($variant => $text),+
                })
            }
        }
    };
}

flag_display!(Strategy, { Strategy::StaticShape => "StaticShape", Strategy::StaticCell => "StaticCell" });
flag_display!(AmpLevel, { AmpLevel::O0 => "O0", AmpLevel::O1 => "O1", AmpLevel::O2 => "O2", AmpLevel::O3 => "O3" });
flag_display!(LossScaler, { LossScaler::Static => "static", LossScaler::Dynamic => "dynamic", LossScaler::None => "none" });
flag_display!(Optimizer, { Optimizer::Sgd => "sgd", Optimizer::Momentum => "momentum", Optimizer::Adam => "adam" });
flag_display!(DeviceTarget, { DeviceTarget::Ascend => "Ascend", DeviceTarget::Gpu => "GPU", DeviceTarget::Cpu => "CPU" });

/// Fixed trainer flags shared by every worker
///
/// Paths are filled in by the launcher after resolution; everything else
/// carries the distributed-training defaults and can only be changed through
/// a launch profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerArgs {
    /// Graph strategy
    pub ms_strategy: Strategy,
    /// Mixed precision level
    pub ms_amp_level: AmpLevel,
    /// Loss scaler mode
    pub ms_loss_scaler: LossScaler,
    /// Loss scaler value
    pub ms_loss_scaler_value: f64,
    /// Optimizer-side loss scale
    pub ms_optim_loss_scale: f64,
    /// Gradient sensitivity
    pub ms_grad_sens: f64,
    /// Apply the update even when gradients overflow
    pub overflow_still_update: bool,
    /// Gradient clipping
    pub clip_grad: bool,
    /// Synchronised batch norm across devices
    pub sync_bn: bool,
    /// Optimizer
    pub optimizer: Optimizer,
    /// Model configuration file
    #[serde(skip)]
    pub cfg: PathBuf,
    /// Dataset descriptor
    #[serde(skip)]
    pub data: PathBuf,
    /// Hyperparameter descriptor
    #[serde(skip)]
    pub hyp: PathBuf,
    /// Device target
    pub device_target: DeviceTarget,
    /// Distributed mode
    pub is_distributed: bool,
    /// Epoch count
    pub epochs: u32,
    /// Activation recomputation
    pub recompute: bool,
    /// Number of recomputed layers
    pub recompute_layers: u32,
    /// Global batch size
    pub batch_size: u32,
}

impl Default for TrainerArgs {
    fn default() -> Self {
        Self {
            ms_strategy: Strategy::StaticShape,
            ms_amp_level: AmpLevel::O0,
            ms_loss_scaler: LossScaler::Static,
            ms_loss_scaler_value: 1024.0,
            ms_optim_loss_scale: 1.0,
            ms_grad_sens: 1024.0,
            overflow_still_update: true,
            clip_grad: false,
            sync_bn: true,
            optimizer: Optimizer::Momentum,
            cfg: PathBuf::new(),
            data: PathBuf::new(),
            hyp: PathBuf::new(),
            device_target: DeviceTarget::Ascend,
            is_distributed: true,
            epochs: 300,
            recompute: true,
            recompute_layers: 5,
            batch_size: 16,
        }
    }
}

/// The trainer parses booleans the Python way
fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl TrainerArgs {
    /// Set the three resolved descriptor paths
    pub fn with_paths(mut self, cfg: PathBuf, data: PathBuf, hyp: PathBuf) -> Self {
        self.cfg = cfg;
        self.data = data;
        self.hyp = hyp;
        self
    }

    /// Render as `--key=value` arguments, in the trainer's documented order
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("--ms_strategy={}", self.ms_strategy),
            format!("--ms_amp_level={}", self.ms_amp_level),
            format!("--ms_loss_scaler={}", self.ms_loss_scaler),
            format!("--ms_loss_scaler_value={}", self.ms_loss_scaler_value),
            format!("--ms_optim_loss_scale={}", self.ms_optim_loss_scale),
            format!("--ms_grad_sens={}", self.ms_grad_sens),
            format!("--overflow_still_update={}", py_bool(self.overflow_still_update)),
            format!("--clip_grad={}", py_bool(self.clip_grad)),
            format!("--sync_bn={}", py_bool(self.sync_bn)),
            format!("--optimizer={}", self.optimizer),
            format!("--cfg={}", self.cfg.display()),
            format!("--data={}", self.data.display()),
            format!("--hyp={}", self.hyp.display()),
            format!("--device_target={}", self.device_target),
            format!("--is_distributed={}", py_bool(self.is_distributed)),
            format!("--epochs={}", self.epochs),
            format!("--recompute={}", py_bool(self.recompute)),
            format!("--recompute_layers={}", self.recompute_layers),
            format!("--batch_size={}", self.batch_size),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flag_vector() {
        let args = TrainerArgs::default().with_paths(
            PathBuf::from("/repo/config/network_yolov7/yolov7.yaml"),
            PathBuf::from("/repo/config/data/coco.yaml"),
            PathBuf::from("/repo/config/data/hyp.scratch.p5.yaml"),
        );

        assert_eq!(
            args.to_args(),
            vec![
                "--ms_strategy=StaticShape",
                "--ms_amp_level=O0",
                "--ms_loss_scaler=static",
                "--ms_loss_scaler_value=1024",
                "--ms_optim_loss_scale=1",
                "--ms_grad_sens=1024",
                "--overflow_still_update=True",
                "--clip_grad=False",
                "--sync_bn=True",
                "--optimizer=momentum",
                "--cfg=/repo/config/network_yolov7/yolov7.yaml",
                "--data=/repo/config/data/coco.yaml",
                "--hyp=/repo/config/data/hyp.scratch.p5.yaml",
                "--device_target=Ascend",
                "--is_distributed=True",
                "--epochs=300",
                "--recompute=True",
                "--recompute_layers=5",
                "--batch_size=16",
            ]
        );
    }

    #[test]
    fn test_partial_profile_keeps_defaults() {
        let args: TrainerArgs =
            serde_json::from_str(r#"{"epochs": 10, "optimizer": "adam", "device_target": "GPU"}"#).unwrap();
        assert_eq!(args.epochs, 10);
        assert_eq!(args.optimizer, Optimizer::Adam);
        assert_eq!(args.device_target, DeviceTarget::Gpu);
        assert_eq!(args.batch_size, 16);
        assert_eq!(args.ms_loss_scaler, LossScaler::Static);
    }

    #[test]
    fn test_fractional_scale_renders_plainly() {
        let args = TrainerArgs {
            ms_optim_loss_scale: 0.5,
            ..Default::default()
        };
        assert!(args.to_args().contains(&"--ms_optim_loss_scale=0.5".to_string()));
    }
}
