//! End-to-end run, setup and listing scenarios driven by a recording runner

mod common;

use common::{RecordingRunner, TestHost, TARGET};
use pktgen_launch::{
    find_unit, list_units, ConfigError, Error, LaunchContext, LaunchOutcome, Launcher, Privilege,
    ProvisionError, Provisioner, VariableNamespace,
};

const DEFAULT_UNIT: &str = r#"
description: "A Pktgen default simple configuration"

setup:
  devices: ["81:00.0", "81:00.1"]
  uio: igb_uio
  hugepages: 1024

run:
  exec: [sudo, -E]
  ld_path: ["%(pktgen_sdk)s/lib"]
  app_name: pktgen
  app_path: ["./build/%(app_name)s"]
  cores: "14,15-22"
  nrank: 4
  proc: auto
  log: 7
  prefix: pg
  opts: [-T, -P]
  map: ["[15:16].0", "[17:18].1"]
  theme: themes/black-yellow.theme
"#;

fn context(host: &TestHost) -> LaunchContext {
    let sdk = host.sdk().to_string_lossy().into_owned();
    let namespace = VariableNamespace::from_lookup(|name| match name {
        "RTE_SDK" => Some(sdk.clone()),
        "RTE_TARGET" => Some(TARGET.to_string()),
        _ => None,
    })
    .unwrap();

    let mut ctx = LaunchContext::new(namespace);
    ctx.work_dir = host.work_dir();
    ctx.sysfs_root = host.sysfs();
    ctx.privilege = Privilege::Sudo;
    ctx
}

#[tokio::test]
async fn test_norun_prints_full_command_line() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    host.touch(&host.work_dir(), "build/pktgen");
    let mut ctx = context(&host);
    ctx.norun = true;
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "default").unwrap();
    let outcome = Launcher::new(&ctx, &runner).run(&unit).await.unwrap();

    let argv = match outcome {
        LaunchOutcome::Printed(argv) => argv,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let expected = format!(
        "sudo -E LD_LIBRARY_PATH={}/{}/lib:none/lib ./build/pktgen \
         -l 14,15-22 -n 4 --proc-type auto --log-level 7 --file-prefix pg \
         -- -T -P -m [15:16].0 -m [17:18].1 -f themes/black-yellow.theme",
        host.sdk().display(),
        TARGET
    );
    assert_eq!(argv.to_string(), expected);
    assert!(argv.separator_index().unwrap() > argv.position("./build/pktgen").unwrap());
    assert_eq!(runner.recorded(), vec!["stty sane"]);
}

#[tokio::test]
async fn test_run_executes_assembled_command() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    host.touch(&host.work_dir(), "build/pktgen");
    let ctx = context(&host);
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "default.cfg").unwrap();
    let outcome = Launcher::new(&ctx, &runner).run(&unit).await.unwrap();

    assert!(matches!(outcome, LaunchOutcome::Completed { .. }));
    let recorded = runner.recorded();
    assert_eq!(recorded.len(), 2);
    assert!(recorded[0].starts_with("sudo -E LD_LIBRARY_PATH="));
    assert!(recorded[0].contains(" ./build/pktgen -l 14,15-22 "));
    assert_eq!(recorded[1], "stty sane");
}

#[tokio::test]
async fn test_missing_binary_fails_and_restores_terminal() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    let ctx = context(&host);
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "default").unwrap();
    let result = Launcher::new(&ctx, &runner).run(&unit).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("./build/pktgen"));
    assert_eq!(runner.recorded(), vec!["stty sane"]);
}

#[tokio::test]
async fn test_setup_sequence() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    host.numa_node(0);
    host.numa_node(1);
    host.touch(&host.sdk(), "usertools/dpdk-devbind.py");
    let ctx = context(&host);
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "default").unwrap();
    let report = Provisioner::new(&ctx, &runner).setup(&unit).await.unwrap();

    assert_eq!(report.plan.sockets, 2);
    assert_eq!(report.plan.per_socket, 512);
    assert!(report.ignored.is_empty());
    assert!(report.hugepage_failures.is_empty());

    let sdk = host.sdk().display().to_string();
    let sysfs = host.sysfs().display().to_string();
    let node = |n: usize| {
        format!(
            "sudo sh -c echo 512 > {}/devices/system/node/node{}/hugepages/hugepages-2048kB/nr_hugepages",
            sysfs, n
        )
    };
    assert_eq!(
        runner.recorded(),
        vec![
            "sudo modprobe uio".to_string(),
            "sudo rmmod igb_uio".to_string(),
            format!("sudo insmod {}/{}/kmod/igb_uio.ko", sdk, TARGET),
            node(0),
            node(1),
            format!(
                "sudo -E {}/usertools/dpdk-devbind.py --bind=igb_uio 81:00.0 81:00.1",
                sdk
            ),
        ]
    );
}

#[tokio::test]
async fn test_setup_falls_back_to_legacy_bind_tool() {
    let host = TestHost::new();
    host.unit(
        "vfio.cfg",
        "setup:\n  uio: vfio-pci\n  hugepages: 256\n  exec: [sudo]\n  devices: [\"05:00.0\"]\n",
    );
    host.touch(&host.sdk(), "tools/dpdk_nic_bind.py");
    let ctx = context(&host);
    let runner = RecordingRunner::new().failing("rmmod");

    let unit = find_unit(&host.cfg_dir(), "vfio").unwrap();
    let report = Provisioner::new(&ctx, &runner).setup(&unit).await.unwrap();

    assert_eq!(report.ignored.len(), 1);
    let recorded = runner.recorded();
    assert_eq!(
        recorded.last().unwrap(),
        &format!(
            "sudo {}/tools/dpdk_nic_bind.py --bind=vfio-pci 05:00.0",
            host.sdk().display()
        )
    );
}

#[tokio::test]
async fn test_setup_without_bind_tool_fails() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    let ctx = context(&host);
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "default").unwrap();
    let result = Provisioner::new(&ctx, &runner).setup(&unit).await;

    match result {
        Err(Error::Provision(ProvisionError::BindToolNotFound { attempted })) => {
            assert_eq!(attempted.len(), 2);
            assert!(attempted[0].ends_with("usertools/dpdk-devbind.py"));
            assert!(attempted[1].ends_with("tools/dpdk_nic_bind.py"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_backend_changes_nothing() {
    let host = TestHost::new();
    host.unit("bad.cfg", "setup:\n  uio: e1000\n  hugepages: 64\n");
    let ctx = context(&host);
    let runner = RecordingRunner::new();

    let unit = find_unit(&host.cfg_dir(), "bad").unwrap();
    let result = Provisioner::new(&ctx, &runner).setup(&unit).await;

    assert!(matches!(
        result,
        Err(Error::Provision(ProvisionError::UnknownDriverBackend(_)))
    ));
    assert!(runner.recorded().is_empty());
}

#[test]
fn test_listing_nested_tree() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);
    host.unit("lab/two-ports.cfg", "run:\n  description: Two port loopback\n  app_name: pktgen\n");
    host.unit("lab/broken.cfg", "run: [unterminated\n");
    host.unit("notes.txt", "not a unit");

    let listing = list_units(&host.cfg_dir());

    let names: Vec<&str> = listing.units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["default", "two-ports"]);
    assert_eq!(listing.units[1].description, "Two port loopback");
    assert_eq!(listing.skipped.len(), 1);
    assert_eq!(listing.skipped[0].name, "broken");

    let table = listing.to_string();
    assert!(table.contains("   default          - A Pktgen default simple configuration"));
    assert!(table.contains("   two-ports        - Two port loopback"));
}

#[test]
fn test_unknown_unit_is_not_found() {
    let host = TestHost::new();
    host.unit("default.cfg", DEFAULT_UNIT);

    let result = find_unit(&host.cfg_dir(), "missing");
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}
