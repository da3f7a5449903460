//! Tests for fleet-level operations.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::gateway::RemoteOutput;
use crate::test_support::{ScriptedControl, ScriptedGateway};
use crate::topology::{CONFIG_FILE_NAME, PublicKey};

const CHAIN_CONFIG: &str = r#"{
    "id": "",
    "val_set_id": "anon",
    "validators": [
        {"validator": {"id": "mach1"}, "index": 0},
        {"validator": {"id": "mach2"}, "index": 1},
        {"validator": {"id": "mach3"}, "index": 2}
    ]
}"#;

struct Harness {
    _tmp: TempDir,
    base: Utf8PathBuf,
    gateway: ScriptedGateway,
    control: ScriptedControl,
}

impl Harness {
    fn orchestrator(&self) -> Orchestrator<ScriptedGateway, ScriptedControl> {
        Orchestrator::new(
            self.gateway.clone(),
            self.control.clone(),
            PipelineSettings::default(),
        )
    }

    fn request(&self, machines: &[&str]) -> StartRequest {
        StartRequest {
            app: String::from("chain"),
            base: self.base.clone(),
            machines: machines.iter().map(|name| HostName::new(*name)).collect(),
            seed_machines: Vec::new(),
            no_app: false,
            publish_all: false,
        }
    }

    fn stored(&self) -> serde_json::Value {
        let contents = std::fs::read_to_string(self.base.join(CONFIG_FILE_NAME))
            .expect("config should be readable");
        serde_json::from_str(&contents).expect("config should be json")
    }
}

fn node_key(index: u32) -> PublicKey {
    PublicKey::new(json!([1, format!("K{index}")]))
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp path");
    std::fs::write(base.join(CONFIG_FILE_NAME), CHAIN_CONFIG).expect("seed chain config");

    let gateway = ScriptedGateway::new();
    let control = ScriptedControl::new();
    for index in 1..=4_u32 {
        let host = format!("mach{index}");
        gateway
            .respond(&format!("ip {host}"), RemoteOutput::success(format!("10.0.0.{index}\n")))
            .respond_on(
                &host,
                "show_validator",
                RemoteOutput::success(format!("[1,\"K{index}\"]")),
            );
        control.push_status(&format!("10.0.0.{index}:46657"), Ok(node_key(index)));
    }
    Harness {
        _tmp: tmp,
        base,
        gateway,
        control,
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn start_fills_every_slot_and_persists(harness: Harness) {
    let report = harness
        .orchestrator()
        .start(&harness.request(&["mach1", "mach2", "mach3"]))
        .await
        .expect("start should succeed");

    assert!(!report.is_degraded());
    assert!(report.dialed.is_none());
    let stored = harness.stored();
    assert_eq!(stored["id"], "chain");
    assert_eq!(stored["validators"][1]["validator"]["id"], "mach2");
    assert_eq!(stored["validators"][1]["validator"]["pub_key"], json!([1, "K2"]));
    assert_eq!(stored["validators"][1]["p2p_addr"], "10.0.0.2:46656");
    assert_eq!(stored["validators"][2]["rpc_addr"], "10.0.0.3:46657");
    assert_eq!(stored["validators"][2]["index"], 2);

    let core = harness
        .gateway
        .commands_on("mach1")
        .into_iter()
        .find(|command| command.contains("--name chain_core"))
        .expect("core launched");
    assert!(
        core.contains("TMSEEDS=\"10.0.0.1:46656,10.0.0.2:46656,10.0.0.3:46656\""),
        "{core}"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failed_host_keeps_its_slot_and_others_are_persisted(harness: Harness) {
    harness.gateway.respond_on(
        "mach2",
        "--entrypoint true",
        RemoteOutput::failure("Cannot connect to the Docker daemon"),
    );

    let report = harness
        .orchestrator()
        .start(&harness.request(&["mach1", "mach2", "mach3"]))
        .await
        .expect("a degraded run still persists");

    assert!(report.is_degraded());
    assert_eq!(report.provisioned.len(), 3);
    let failures = report.provisioned.failures().collect::<Vec<_>>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures.first().map(|(host, _)| host.as_str()), Some("mach2"));

    let stored = harness.stored();
    assert_eq!(stored["validators"][0]["p2p_addr"], "10.0.0.1:46656");
    assert_eq!(stored["validators"][1]["p2p_addr"], "");
    assert_eq!(stored["validators"][2]["p2p_addr"], "10.0.0.3:46656");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn rerun_clears_the_endpoint_of_a_host_that_failed(harness: Harness) {
    let orchestrator = harness.orchestrator();
    let request = harness.request(&["mach1", "mach2", "mach3"]);
    orchestrator
        .start(&request)
        .await
        .expect("first run should succeed");
    harness.gateway.respond_on(
        "mach2",
        "--entrypoint true",
        RemoteOutput::failure("Cannot connect to the Docker daemon"),
    );

    let report = orchestrator
        .start(&request)
        .await
        .expect("a degraded rerun still persists");

    assert_eq!(report.provisioned.failure_count(), 1);
    let stored = harness.stored();
    let filled = stored["validators"]
        .as_array()
        .expect("validators array")
        .iter()
        .filter(|slot| slot["p2p_addr"] != "" || slot["rpc_addr"] != "")
        .count();
    assert_eq!(filled, 2);
    assert_eq!(stored["validators"][1]["p2p_addr"], "");
    assert_eq!(stored["validators"][1]["rpc_addr"], "");
    assert_eq!(stored["validators"][1]["validator"]["id"], "mach2");
    assert_eq!(stored["validators"][1]["index"], 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn run_with_every_host_failing_still_persists(harness: Harness) {
    harness.gateway.respond(
        "--entrypoint true",
        RemoteOutput::failure("Cannot connect to the Docker daemon"),
    );

    let report = harness
        .orchestrator()
        .start(&harness.request(&["mach1", "mach2", "mach3"]))
        .await
        .expect("a run with no successes still persists");

    assert_eq!(report.provisioned.by_host().len(), 3);
    assert_eq!(report.provisioned.failure_count(), 3);
    assert!(report.is_degraded());
    let stored = harness.stored();
    assert_eq!(stored["id"], "chain");
    let validators = stored["validators"].as_array().expect("validators array");
    assert_eq!(validators.len(), 3);
    assert!(
        validators
            .iter()
            .all(|slot| slot["p2p_addr"] == "" && slot["rpc_addr"] == ""),
        "{stored}"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn extra_hosts_without_slots_are_reported(harness: Harness) {
    let report = harness
        .orchestrator()
        .start(&harness.request(&["mach1", "mach2", "mach3", "mach4"]))
        .await
        .expect("start should persist");

    assert!(report.provisioned.is_complete_success());
    assert_eq!(
        report.unplaced,
        vec![AssemblyError::NoSlot {
            host: String::from("mach4"),
            ordinal: 3,
            slots: 3,
        }]
    );
    assert!(report.is_degraded());
    assert_eq!(harness.stored()["validators"].as_array().map(Vec::len), Some(3));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn publish_all_dials_collected_peers(harness: Harness) {
    for index in 1..=2_u32 {
        harness.gateway.respond_on(
            &format!("mach{index}"),
            "docker port chain_core",
            RemoteOutput::success(format!(
                "46656/tcp -> 0.0.0.0:3{index}001\n46657/tcp -> 0.0.0.0:3{index}002\n"
            )),
        );
        harness
            .control
            .push_status(&format!("10.0.0.{index}:3{index}002"), Ok(node_key(index)));
    }
    harness.control.fail_dial("10.0.0.2:32002");
    let request = StartRequest {
        publish_all: true,
        ..harness.request(&["mach1", "mach2"])
    };

    let report = harness
        .orchestrator()
        .start(&request)
        .await
        .expect("start should succeed");

    let dialed = report.dialed.expect("publish-all dials seeds");
    assert_eq!(dialed.len(), 2);
    assert_eq!(dialed.failure_count(), 1);
    let dials = harness.control.dials();
    assert_eq!(dials.len(), 2);
    for (_, seeds) in &dials {
        let mut sorted = seeds.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["10.0.0.1:31001", "10.0.0.2:32001"]);
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn explicit_seed_machines_drive_env_and_dialing(harness: Harness) {
    harness.gateway.respond(
        "docker port chain_core",
        RemoteOutput::success("46656/tcp -> 0.0.0.0:46656\n46657/tcp -> 0.0.0.0:46657\n"),
    );
    let request = StartRequest {
        seed_machines: vec![HostName::new("mach3")],
        publish_all: true,
        ..harness.request(&["mach1", "mach2"])
    };

    let report = harness
        .orchestrator()
        .start(&request)
        .await
        .expect("start should succeed");

    assert!(report.provisioned.is_complete_success());
    let seeds = harness
        .control
        .dials()
        .into_iter()
        .map(|(_, seeds)| seeds)
        .collect::<Vec<_>>();
    assert_eq!(seeds, vec![vec![String::from("10.0.0.3:46656")]; 2]);
    assert!(
        harness
            .gateway
            .commands_on("mach1")
            .iter()
            .any(|command| command.contains("TMSEEDS=\"10.0.0.3:46656\""))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unresolvable_seed_aborts_before_provisioning(harness: Harness) {
    harness
        .gateway
        .respond("ip mach2", RemoteOutput::failure("Host does not exist: \"mach2\""));

    let err = harness
        .orchestrator()
        .start(&harness.request(&["mach1", "mach2"]))
        .await
        .expect_err("seed lookup fails");

    assert!(matches!(err, StartError::SeedAddress { ref host, .. } if host.as_str() == "mach2"));
    assert!(harness.gateway.commands_on("mach1").is_empty());
    assert_eq!(harness.stored()["id"], "");
}

#[tokio::test]
async fn missing_chain_config_is_fatal() {
    let tmp = TempDir::new().expect("tempdir");
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp path");
    let orchestrator = Orchestrator::new(
        ScriptedGateway::new(),
        ScriptedControl::new(),
        PipelineSettings::default(),
    );

    let err = orchestrator
        .start(&StartRequest {
            app: String::from("chain"),
            base,
            machines: vec![HostName::new("mach1")],
            seed_machines: Vec::new(),
            no_app: false,
            publish_all: false,
        })
        .await
        .expect_err("no chain config");

    assert!(matches!(err, StartError::ReadConfig(_)), "{err}");
}

#[rstest]
#[tokio::test]
async fn restart_reports_each_host(harness: Harness) {
    harness
        .gateway
        .respond_on("mach2", "docker start chain_core", RemoteOutput::failure("no such container"));

    let report = harness
        .orchestrator()
        .restart("chain", vec![HostName::new("mach1"), HostName::new("mach2")], false)
        .await;

    assert_eq!(report.len(), 2);
    assert_eq!(report.failure_count(), 1);
    assert_eq!(
        harness.gateway.commands_on("mach1"),
        vec!["docker start chain_app", "docker start chain_core"]
    );
}

#[rstest]
#[case::with_app(false, vec!["docker stop chain_core", "docker stop chain_app"])]
#[case::core_only(true, vec!["docker stop chain_core"])]
#[tokio::test]
async fn stop_honours_no_app(
    harness: Harness,
    #[case] no_app: bool,
    #[case] expected: Vec<&'static str>,
) {
    let report = harness
        .orchestrator()
        .stop("chain", vec![HostName::new("mach1")], no_app)
        .await;

    assert!(report.is_complete_success());
    assert_eq!(harness.gateway.commands_on("mach1"), expected);
}

#[rstest]
#[tokio::test]
async fn ports_reads_core_port_maps(harness: Harness) {
    harness.gateway.respond(
        "docker port chain_core",
        RemoteOutput::success("46656/tcp -> 0.0.0.0:32768\n"),
    );

    let report = harness
        .orchestrator()
        .ports("chain", vec![HostName::new("mach1")])
        .await;

    let (_, map) = report.successes().next().expect("one success");
    assert_eq!(map.host_port(46656), Some(32768));
}

#[rstest]
#[tokio::test]
async fn machine_commands_name_each_host(harness: Harness) {
    let orchestrator = harness.orchestrator();
    let hosts = vec![HostName::new("mach1"), HostName::new("mach2")];

    let created = orchestrator
        .create_machines(hosts.clone(), vec![String::from("--driver"), String::from("generic")])
        .await;
    let destroyed = orchestrator.destroy_machines(hosts).await;

    assert!(created.is_complete_success());
    assert!(destroyed.is_complete_success());
    let mut calls = harness.gateway.machine_calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "create --driver generic mach1",
            "create --driver generic mach2",
            "rm -f mach1",
            "rm -f mach2",
        ]
    );
}
