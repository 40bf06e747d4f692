//! Integration tests for zonefw
//!
//! These tests drive a [`Session`] against the `textdir` engine in a
//! temporary directory and verify that the policy survives a close/reopen
//! cycle, that the storage lock is honored and that rule checksums are
//! advisory.

#![allow(clippy::uninlined_format_args)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use zonefw::backend::lock::DirLock;
use zonefw::config::{self, AppConfig};
use zonefw::core::error::{BackendError, Error, ErrorKind};
use zonefw::core::services::PROTO_TCP;
use zonefw::core::zones::ZoneKind;
use zonefw::{LoadReport, Session};

/// Textdir configuration rooted below `dir`
fn textdir_config(dir: &Path) -> AppConfig {
    AppConfig {
        backend: "textdir".to_string(),
        datadir: dir.join("tree"),
        lock_timeout_secs: 1,
        lock_retry_ms: 10,
        ..AppConfig::default()
    }
}

/// Creates a small office policy through the public editing API.
fn build_policy(session: &mut Session) {
    session.init_storage().unwrap();

    session.new_interface("lan", "eth1").unwrap();
    session.set_interface_ipv4("lan", "192.168.1.1").unwrap();

    session.new_zone("lan", ZoneKind::Zone).unwrap();
    session.new_zone("office.lan", ZoneKind::Network).unwrap();
    session.set_zone_address("office.lan", "192.168.1.0/24").unwrap();
    session.attach_interface("office.lan", "lan").unwrap();
    session.new_zone("pc1.office.lan", ZoneKind::Host).unwrap();
    session.set_zone_address("pc1.office.lan", "192.168.1.50").unwrap();
    session.new_zone("admins.office.lan", ZoneKind::Group).unwrap();
    session.add_group_member("admins.office.lan", "pc1").unwrap();

    session.new_service("ssh").unwrap();
    session.set_service_ports("ssh", "TCP", "22").unwrap();

    session
        .insert_rule(1, "accept service ssh from admins.office.lan to firewall")
        .unwrap();
    session
        .insert_rule(2, "drop service any from lan to firewall")
        .unwrap();
    session.block("203.0.113.7").unwrap();
}

fn reopen(config: &AppConfig) -> (Session, LoadReport) {
    let mut session = Session::open(config.clone()).unwrap();
    let report = session.load().unwrap();
    (session, report)
}

fn zone_names(session: &Session) -> Vec<String> {
    session.zones().iter().map(|(_, z)| z.name.clone()).collect()
}

#[test]
fn test_policy_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = textdir_config(dir.path());

    let mut session = Session::open(config.clone()).unwrap();
    build_policy(&mut session);
    let written_zones = zone_names(&session);
    let written_rules = session.rules().to_lines();
    session.close().unwrap();

    let (mut session, report) = reopen(&config);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.interfaces, 1);
    assert_eq!(report.services, 1);
    assert_eq!(report.rules, 2);
    assert_eq!(report.blocked, 1);

    assert_eq!(zone_names(&session), written_zones);
    assert_eq!(
        zone_names(&session),
        [
            "lan",
            "office.lan",
            "pc1.office.lan",
            "admins.office.lan",
            "firewall(lan)"
        ]
    );
    assert_eq!(session.rules().to_lines(), written_rules);
    assert_eq!(session.blocklist().to_lines(), ["block 203.0.113.7"]);

    let group = session.zones().search("admins.office.lan").unwrap();
    assert_eq!(session.zones().member_names(group), ["pc1"]);

    let network = session.zones().search("office.lan").unwrap();
    let lan = session.interfaces().search("lan").unwrap();
    assert!(
        session
            .zones()
            .get(network)
            .unwrap()
            .interfaces
            .values()
            .any(|i| *i == lan)
    );

    let (caches, errors) = session.analyze_rules();
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(caches.len(), 2);

    let pc1 = session.zones().search("pc1.office.lan");
    assert_eq!(
        session.zone_by_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50))),
        pc1
    );
    let firewall = session.zones().search("firewall(lan)");
    assert_eq!(
        session.zone_by_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))),
        firewall
    );
    let ssh = session.services().search("ssh");
    assert_eq!(session.service_by_port(PROTO_TCP, 22), ssh);

    session.close().unwrap();
}

#[test]
fn test_edits_after_reopen_persist() {
    let dir = tempfile::tempdir().unwrap();
    let config = textdir_config(dir.path());

    let mut session = Session::open(config.clone()).unwrap();
    build_policy(&mut session);
    session.close().unwrap();

    let (mut session, _) = reopen(&config);
    session.rename_zone("pc1.office.lan", "pc2.office.lan").unwrap();
    session.unblock("203.0.113.7").unwrap();
    session.block("pc2.office.lan").unwrap();
    session.remove_rule(2).unwrap();
    session.close().unwrap();

    let (session, report) = reopen(&config);
    assert_eq!(report.skipped, 0);
    assert!(session.zones().search("pc1.office.lan").is_none());
    let group = session.zones().search("admins.office.lan").unwrap();
    assert_eq!(session.zones().member_names(group), ["pc2"]);
    assert_eq!(session.blocklist().to_lines(), ["block pc2.office.lan"]);
    assert_eq!(
        session.rules().to_lines(),
        ["accept service ssh from admins.office.lan to firewall"]
    );
    session.close().unwrap();
}

#[test]
fn test_recursive_delete_removes_tree() {
    let dir = tempfile::tempdir().unwrap();
    let config = textdir_config(dir.path());

    let mut session = Session::open(config.clone()).unwrap();
    build_policy(&mut session);

    let err = session.delete_zone("lan", true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);
    assert!(session.zones().search("pc1.office.lan").is_some());

    session.remove_rule(2).unwrap();
    session.remove_rule(1).unwrap();
    session.delete_zone("lan", true).unwrap();
    assert!(!config.datadir.join("zones").join("lan").exists());
    session.close().unwrap();

    let (session, _) = reopen(&config);
    assert_eq!(zone_names(&session), ["firewall(lan)"]);
    let lan = session.interfaces().search("lan").unwrap();
    assert_eq!(session.interfaces().get(lan).unwrap().refcnt_network, 0);
    session.close().unwrap();
}

#[test]
fn test_tampered_rules_file_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    let config = textdir_config(dir.path());

    let mut session = Session::open(config.clone()).unwrap();
    build_policy(&mut session);
    session.close().unwrap();

    let rules_file = config.datadir.join("rules").join("rules.conf");
    let sidecar = config.datadir.join("rules").join("rules.conf.sha256");
    assert!(sidecar.is_file());

    let mut content = std::fs::read_to_string(&rules_file).unwrap();
    content.push_str("RULE=\"reject service ssh from any to lan\"\n");
    std::fs::write(&rules_file, content).unwrap();

    let (session, report) = reopen(&config);
    assert_eq!(report.rules, 3);
    assert_eq!(
        session.rules().get(3).map(|r| r.to.as_str()),
        Some("lan")
    );
    session.close().unwrap();
}

#[test]
fn test_save_rules_restores_lost_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = textdir_config(dir.path());

    let mut session = Session::open(config.clone()).unwrap();
    build_policy(&mut session);
    let rules_dir = config.datadir.join("rules");
    for file in ["rules.conf", "rules.conf.sha256", "blocklist.conf", "blocklist.conf.sha256"] {
        let _ = std::fs::remove_file(rules_dir.join(file));
    }
    assert!(!rules_dir.join("rules.conf").exists());

    session.save_rules().unwrap();
    let written_rules = session.rules().to_lines();
    session.close().unwrap();

    let (session, report) = reopen(&config);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.rules, 2);
    assert_eq!(report.blocked, 1);
    assert_eq!(session.rules().to_lines(), written_rules);
    session.close().unwrap();
}

#[test]
fn test_held_lock_blocks_writes() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        lock_timeout_secs: 0,
        ..textdir_config(dir.path())
    };

    let mut session = Session::open(config.clone()).unwrap();
    session.init_storage().unwrap();

    let holder = DirLock::acquire(
        &config.datadir.join(".lock"),
        Duration::from_secs(1),
        Duration::from_millis(10),
    )
    .unwrap();

    let err = session.new_zone("dmz", ZoneKind::Zone).unwrap_err();
    assert!(
        matches!(err, Error::Backend(BackendError::LockTimeout { .. })),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(session.zones().search("dmz").is_none());

    drop(holder);
    session.new_zone("dmz", ZoneKind::Zone).unwrap();
    assert!(session.zones().search("dmz").is_some());
    session.close().unwrap();
}

#[test]
fn test_config_file_selects_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let written = AppConfig {
        backend: "memory".to_string(),
        datadir: dir.path().join("unused"),
        hash_rows: 16,
        ..AppConfig::default()
    };
    config::save_config(&written, &path).unwrap();

    let loaded = config::load_config(&path).unwrap();
    assert_eq!(loaded, written);

    let mut session = Session::open(loaded).unwrap();
    session.init_storage().unwrap();
    session.new_zone("dmz", ZoneKind::Zone).unwrap();
    assert!(session.zones().search("dmz").is_some());
    assert!(!dir.path().join("unused").exists());
    session.close().unwrap();
}

#[test]
fn test_unknown_engine_rejected() {
    let config = AppConfig {
        backend: "ldap".to_string(),
        ..AppConfig::default()
    };
    assert!(matches!(Session::open(config), Err(Error::Config(_))));
}
