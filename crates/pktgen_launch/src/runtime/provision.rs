//! Host setup: huge pages, kernel-bypass driver modules and device binding

use crate::config::{ConfigUnit, OptionGroup, SubstitutionError, VariableNamespace};
use crate::runtime::command::{
    run_step, CommandError, CommandRunner, Policy, Privilege, StepResult, SystemCommand,
};
use crate::runtime::context::LaunchContext;
use crate::runtime::resolver::{PathResolver, ResolveError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// NUMA node ids checked when counting sockets
pub const MAX_NUMA_NODES: usize = 8;

/// Per-node control file for 2 MiB huge pages, relative to the node directory
const HUGEPAGE_CONTROL: &str = "hugepages/hugepages-2048kB/nr_hugepages";

/// Device binding utility locations, newest layout first
pub const BIND_TOOL_CANDIDATES: &[&str] = &[
    "%(sdk)s/usertools/dpdk-devbind.py",
    "%(sdk)s/tools/dpdk_nic_bind.py",
];

/// Out-of-tree igb_uio module built with the SDK
const IGB_UIO_MODULE: &str = "%(sdk)s/%(target)s/kmod/igb_uio.ko";

/// Kernel-bypass driver backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverBackend {
    /// SDK-built `igb_uio`, depends on the generic `uio` module
    #[default]
    IgbUio,
    /// In-tree `vfio-pci`
    VfioPci,
    /// In-tree `uio_pci_generic`
    UioPciGeneric,
}

impl DriverBackend {
    /// Name understood by the binding utility
    pub fn name(&self) -> &'static str {
        match self {
            DriverBackend::IgbUio => "igb_uio",
            DriverBackend::VfioPci => "vfio-pci",
            DriverBackend::UioPciGeneric => "uio_pci_generic",
        }
    }
}

impl FromStr for DriverBackend {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "igb_uio" => Ok(DriverBackend::IgbUio),
            "vfio-pci" | "vfio_pci" => Ok(DriverBackend::VfioPci),
            "uio_pci_generic" => Ok(DriverBackend::UioPciGeneric),
            other => Err(ProvisionError::UnknownDriverBackend(other.to_string())),
        }
    }
}

impl fmt::Display for DriverBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Huge-page control file of one NUMA node
pub fn hugepage_control_path(sysfs_root: &Path, node: usize) -> PathBuf {
    sysfs_root
        .join("devices/system/node")
        .join(format!("node{}", node))
        .join(HUGEPAGE_CONTROL)
}

/// Count NUMA nodes 0..8 exposing a huge-page control file.
///
/// Node ids need not be contiguous. Never returns less than one.
pub fn count_sockets(sysfs_root: &Path) -> usize {
    let found = (0..MAX_NUMA_NODES)
        .filter(|&node| hugepage_control_path(sysfs_root, node).exists())
        .count();
    found.max(1)
}

/// Huge pages per socket.
///
/// Floor division: up to `sockets - 1` pages of the request are left
/// unallocated.
pub fn plan_hugepages(total: u64, sockets: usize) -> u64 {
    total / sockets.max(1) as u64
}

/// What a setup pass will do, computed from the host and the `setup` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningPlan {
    pub sockets: usize,
    pub total_hugepages: u64,
    pub per_socket: u64,
    pub backend: DriverBackend,
    pub devices: Vec<String>,
}

/// A socket whose huge-page write failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HugepageFailure {
    pub socket: usize,
    pub reason: String,
}

/// Summary of a completed setup pass
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub plan: ProvisioningPlan,
    /// Best-effort steps that failed and were skipped
    pub ignored: Vec<StepResult>,
    pub hugepage_failures: Vec<HugepageFailure>,
}

/// Prepares the host for a DPDK application
pub struct Provisioner<'a, R: CommandRunner> {
    ctx: &'a LaunchContext,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Provisioner<'a, R> {
    pub fn new(ctx: &'a LaunchContext, runner: &'a R) -> Self {
        Self { ctx, runner }
    }

    /// Load a unit and run the whole setup sequence
    pub async fn setup(&self, unit_path: &Path) -> crate::Result<ProvisionReport> {
        let unit = ConfigUnit::load(unit_path)?;
        let namespace = self.ctx.namespace_for(unit.run.first("app_name"));

        log::info!(
            "Setup DPDK to run '{}' application from {}",
            unit.run.first("app_name").unwrap_or_default(),
            unit_path.display()
        );

        let plan = self.plan(&unit.setup, &namespace).await?;
        log::info!(
            "{} socket(s), {} huge pages per socket, {} driver",
            plan.sockets,
            plan.per_socket,
            plan.backend
        );

        let ignored = self.cycle_driver_module(plan.backend).await?;
        let hugepage_failures = self.apply_hugepages(&plan).await;

        if plan.devices.is_empty() {
            log::info!("No devices listed, skipping device binding");
        } else {
            self.bind_devices(plan.backend, &plan.devices, &unit.setup, &namespace)
                .await?;
        }

        Ok(ProvisionReport {
            plan,
            ignored,
            hugepage_failures,
        })
    }

    /// Compute the plan; validates the backend before anything is changed
    pub async fn plan(
        &self,
        setup: &OptionGroup,
        namespace: &VariableNamespace,
    ) -> Result<ProvisioningPlan, ProvisionError> {
        let values = |key: &str| {
            setup
                .substituted(key, namespace)
                .map_err(|e| ProvisionError::Substitution {
                    context: format!("setup.{}", key),
                    source: e,
                })
        };

        let backend = match values("uio")?.and_then(|v| v.into_iter().next()) {
            Some(name) => name.parse()?,
            None => DriverBackend::default(),
        };
        let devices = values("devices")?.unwrap_or_default();

        let sockets = self.count_sockets();
        let total_hugepages = match values("hugepages")?.and_then(|v| v.into_iter().next()) {
            Some(total) => total
                .trim()
                .parse::<u64>()
                .map_err(|_| ProvisionError::InvalidHugepages(total.clone()))?,
            None => self.system_hugepages().await?,
        };

        Ok(ProvisioningPlan {
            sockets,
            total_hugepages,
            per_socket: plan_hugepages(total_hugepages, sockets),
            backend,
            devices,
        })
    }

    /// NUMA sockets on this host
    pub fn count_sockets(&self) -> usize {
        count_sockets(&self.ctx.sysfs_root)
    }

    /// Huge pages currently reserved system-wide (`vm.nr_hugepages`)
    async fn system_hugepages(&self) -> Result<u64, ProvisionError> {
        let cmd = SystemCommand::new("sysctl").args(["-n", "vm.nr_hugepages"]);
        let output = self
            .runner
            .capture(&cmd)
            .await
            .map_err(|e| ProvisionError::HugepageQuery(e.to_string()))?;
        output
            .trim()
            .parse()
            .map_err(|_| ProvisionError::HugepageQuery(format!("unexpected output '{}'", output)))
    }

    /// Unload then reload the backend's kernel module.
    ///
    /// Unload failures are expected when nothing was loaded and are only
    /// logged; a failing load aborts setup.
    pub async fn cycle_driver_module(
        &self,
        backend: DriverBackend,
    ) -> Result<Vec<StepResult>, ProvisionError> {
        let privilege = self.ctx.privilege;
        let mut steps = Vec::new();

        let load = match backend {
            DriverBackend::IgbUio => {
                let module = self.ctx.namespace.substitute(IGB_UIO_MODULE).map_err(|e| {
                    ProvisionError::Substitution {
                        context: "igb_uio module path".to_string(),
                        source: e,
                    }
                })?;
                privilege.command("insmod").arg(module)
            }
            DriverBackend::VfioPci | DriverBackend::UioPciGeneric => {
                privilege.command("modprobe").arg(backend.name())
            }
        };

        if backend == DriverBackend::IgbUio {
            log::info!("modprobe the 'uio' required module");
            let uio = privilege.command("modprobe").arg("uio");
            steps.push(self.best_effort(&uio).await);
        }

        log::info!("Remove {} if already installed", backend);
        let unload = privilege.command("rmmod").arg(backend.name());
        steps.push(self.best_effort(&unload).await);

        log::info!("Load the {} module", backend);
        run_step(self.runner, &load, Policy::Required)
            .await
            .map_err(|e| ProvisionError::ModuleLoadFailed {
                module: backend.name().to_string(),
                source: e,
            })?;

        steps.retain(|step| matches!(step, StepResult::Ignored { .. }));
        Ok(steps)
    }

    /// Write the per-socket huge-page count to every socket.
    ///
    /// Each socket is attempted independently; failures are collected.
    pub async fn apply_hugepages(&self, plan: &ProvisioningPlan) -> Vec<HugepageFailure> {
        let mut failures = Vec::new();

        for socket in 0..plan.sockets {
            let path = hugepage_control_path(&self.ctx.sysfs_root, socket);
            log::info!("Set socket {} to {} huge pages", socket, plan.per_socket);

            let cmd = self
                .ctx
                .privilege
                .command("sh")
                .arg("-c")
                .arg(format!("echo {} > {}", plan.per_socket, path.display()));

            if let Err(e) = run_step(self.runner, &cmd, Policy::Required).await {
                log::warn!("Huge page setup for socket {} failed: {}", socket, e);
                failures.push(HugepageFailure {
                    socket,
                    reason: e.to_string(),
                });
            }
        }

        failures
    }

    /// Bind devices to the backend with the SDK's binding utility.
    ///
    /// The device list is passed through in configuration order.
    pub async fn bind_devices(
        &self,
        backend: DriverBackend,
        devices: &[String],
        setup: &OptionGroup,
        namespace: &VariableNamespace,
    ) -> Result<(), ProvisionError> {
        let resolver = PathResolver::new(namespace, &self.ctx.work_dir);
        let tool = resolver
            .resolve(BIND_TOOL_CANDIDATES)
            .map_err(|e| match e {
                ResolveError::NotFound { attempted } => {
                    ProvisionError::BindToolNotFound { attempted }
                }
                ResolveError::Substitution(e) => ProvisionError::Substitution {
                    context: "binding utility path".to_string(),
                    source: e,
                },
            })?;

        let substituted = |key: &str| {
            setup
                .substituted(key, namespace)
                .map_err(|e| ProvisionError::Substitution {
                    context: format!("setup.{}", key),
                    source: e,
                })
        };

        let exec = match substituted("exec")? {
            Some(exec) => exec,
            None => match self.ctx.privilege {
                Privilege::Root => Vec::new(),
                Privilege::Sudo => vec!["sudo".to_string(), "-E".to_string()],
            },
        };
        let tool = tool.to_string_lossy().into_owned();

        let mut exec = exec.into_iter();
        let cmd = match exec.next() {
            Some(program) => SystemCommand::new(program).args(exec).arg(tool),
            None => SystemCommand::new(tool),
        }
        .args(substituted("opts")?.unwrap_or_default())
        .arg(format!("--bind={}", backend.name()))
        .args(devices.iter().cloned());

        log::info!("Binding {} device(s) to {}", devices.len(), backend);
        if self.ctx.verbose {
            log::info!("Bind following devices to {}:", backend);
            for device in devices {
                log::info!("    {}", device);
            }
            log::info!("Bind command as a set: {:?}", command_tokens(&cmd));
        }

        run_step(self.runner, &cmd, Policy::Required)
            .await
            .map_err(ProvisionError::BindFailed)?;
        Ok(())
    }

    async fn best_effort(&self, cmd: &SystemCommand) -> StepResult {
        match run_step(self.runner, cmd, Policy::BestEffort).await {
            Ok(result) => result,
            // best-effort steps never return an error
            Err(e) => StepResult::Ignored {
                command: cmd.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

fn command_tokens(cmd: &SystemCommand) -> Vec<&str> {
    std::iter::once(cmd.program.as_str())
        .chain(cmd.args.iter().map(String::as_str))
        .collect()
}

/// Errors that can occur while preparing the host
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Unknown driver backend '{0}' (expected igb_uio, vfio-pci or uio_pci_generic)")]
    UnknownDriverBackend(String),

    #[error("Failed to load the {module} module: {source}")]
    ModuleLoadFailed {
        module: String,
        #[source]
        source: CommandError,
    },

    #[error("Failed to find dpdk-devbind.py or dpdk_nic_bind.py (tried: {})", .attempted.join(", "))]
    BindToolNotFound { attempted: Vec<String> },

    #[error("Device binding failed: {0}")]
    BindFailed(#[source] CommandError),

    #[error("Unable to read vm.nr_hugepages: {0}")]
    HugepageQuery(String),

    #[error("Invalid huge page count '{0}'")]
    InvalidHugepages(String),

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },
}
