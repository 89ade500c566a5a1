mod common;

use common::*;
use stagehand_core::{Action, CoreError, StatusLevel, StoreLock};
use stagehand_runtime::MockBackend;
use stagehand_schema::{parse_options_str, DaemonName, DependencyKind};
use stagehand_store::{Journal, Milestone, StoreLayout, DB_SYNCED, DOMAIN_INIT_DONE};
use std::sync::Arc;

fn milestones(engine: &stagehand_core::Engine) -> Vec<Milestone> {
    engine.milestones().unwrap().iter().collect()
}

#[test]
fn fresh_unit_plans_install_and_base_config() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    assert_eq!(
        engine.plan(&signals).unwrap(),
        [Action::Install, Action::RenderBaseConfig]
    );
    // Planning has no side effects.
    assert!(backend.calls().is_empty());
    assert!(milestones(&engine).is_empty());
}

#[test]
fn first_pass_installs_and_renders_base_config() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let report = engine.run_pass(&signals).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.applied.len(), 2);
    assert_eq!(
        milestones(&engine),
        [Milestone::Installed, Milestone::BaseConfigRendered]
    );
    assert_eq!(backend.count("install"), 1);
    assert_eq!(backend.count("render"), 1);

    let restarts = backend.restarts();
    let restarted: Vec<&str> = restarts.iter().map(DaemonName::as_str).collect();
    assert_eq!(
        restarted,
        ["trove-api", "trove-taskmanager", "trove-conductor"]
    );
    assert_eq!(report.status.level, StatusLevel::Waiting);
    assert_eq!(
        report.status.message,
        "Waiting for: database-migrated, full-config-rendered"
    );
}

#[test]
fn converge_reaches_ready() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let reports = engine.converge(&signals, 10).unwrap();
    assert_eq!(reports.len(), 4);
    assert!(reports.last().unwrap().planned.is_empty());

    let status = engine.status(&signals).unwrap();
    assert_eq!(status.level, StatusLevel::Active);
    assert_eq!(status.message, "Unit is ready");

    assert_eq!(backend.count("run trove-manage db_sync"), 1);
    assert_eq!(backend.endpoints().len(), 1);
    assert!(engine.shared().get(DB_SYNCED).unwrap().is_some());
    assert!(engine.plan(&signals).unwrap().is_empty());
}

#[test]
fn full_config_restarts_only_daemons_of_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    engine.run_pass(&signals).unwrap();
    engine.run_pass(&signals).unwrap();
    let before = backend.restarts().len();

    let report = engine.run_pass(&signals).unwrap();
    assert_eq!(report.planned, [Action::RenderFullConfig]);
    let restarted: Vec<String> = backend.restarts()[before..]
        .iter()
        .map(|d| d.as_str().to_owned())
        .collect();
    assert_eq!(restarted, ["trove-api"]);
}

#[test]
fn incomplete_database_requests_credentials_each_pass() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals(
        "trove/0",
        "10.0.0.5",
        false,
        vec![
            incomplete(DependencyKind::Database),
            available(DependencyKind::MessageQueue),
            available(DependencyKind::Identity),
        ],
    );

    let report = engine.run_pass(&signals).unwrap();
    assert_eq!(report.planned, [Action::RequestDatabase, Action::Install]);
    assert_eq!(report.status.message, "Incomplete relations: database");

    engine.run_pass(&signals).unwrap();
    assert_eq!(backend.count("request-credentials database"), 2);

    // Repeated requests are identical, so the provider sees one grant.
    let requests = backend.credential_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].principal, "trove");
    assert_eq!(requests[0].resource, "trove");
    assert_eq!(requests[0].host, "10.0.0.5");
    assert_eq!(requests[0].prefix, None);
}

#[test]
fn missing_relations_block_base_config() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals(
        "trove/0",
        "10.0.0.5",
        true,
        vec![available(DependencyKind::Database)],
    );

    let report = engine.run_pass(&signals).unwrap();
    assert_eq!(report.planned, [Action::Install]);
    assert_eq!(
        report.status.message,
        "Missing relations: message-queue, identity"
    );
}

#[test]
fn failed_install_skips_rest_of_chain() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    backend.fail("install", 1);
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let report = engine.run_pass(&signals).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].action, Action::Install);
    assert_eq!(report.skipped, [Action::RenderBaseConfig]);
    assert!(milestones(&engine).is_empty());
    assert_eq!(backend.count("render"), 0);

    let report = engine.run_pass(&signals).unwrap();
    assert!(report.is_ok());
    assert_eq!(
        milestones(&engine),
        [Milestone::Installed, Milestone::BaseConfigRendered]
    );
}

#[test]
fn failed_migration_is_retried_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    backend.fail("trove-manage", 1);
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let reports = engine.converge(&signals, 10).unwrap();
    let last = reports.last().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(last.failed[0].action, Action::MigrateDatabase);
    assert!(last.failed[0].error.contains("trove-manage"));
    // Endpoint registration is independent of the chain.
    assert_eq!(last.applied[0].action, Action::RegisterEndpoint);
    assert!(!engine.milestones().unwrap().contains(Milestone::DatabaseMigrated));
    assert!(engine.shared().get(DB_SYNCED).unwrap().is_none());

    let report = engine.run_pass(&signals).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.applied[0].action, Action::MigrateDatabase);
    assert!(engine.shared().get(DB_SYNCED).unwrap().is_some());
    assert_eq!(backend.count("run trove-manage db_sync"), 2);
}

#[test]
fn evaluation_never_clears_milestones() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let ready = signals("trove/0", "10.0.0.5", true, core_available());
    engine.converge(&ready, 10).unwrap();
    let reached = milestones(&engine);

    // Losing every relation changes the status, not the recorded progress.
    let gone = signals("trove/0", "10.0.0.5", false, Vec::new());
    for _ in 0..3 {
        assert!(engine.plan(&gone).unwrap().is_empty());
        let report = engine.run_pass(&gone).unwrap();
        assert!(report.invalidated.is_empty());
    }
    assert_eq!(milestones(&engine), reached);
    assert_eq!(
        engine.status(&gone).unwrap().message,
        "Missing relations: database, message-queue, identity"
    );
}

#[test]
fn applying_a_reached_action_again_has_no_side_effect() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    for _ in 0..2 {
        assert_eq!(
            engine.apply(Action::Install, &signals).unwrap(),
            [Milestone::Installed]
        );
    }
    assert_eq!(backend.count("install"), 1);

    engine.apply(Action::RenderBaseConfig, &signals).unwrap();
    engine.apply(Action::MigrateDatabase, &signals).unwrap();
    let synced = engine.shared().get(DB_SYNCED).unwrap();
    assert_eq!(
        engine.apply(Action::MigrateDatabase, &signals).unwrap(),
        [Milestone::DatabaseMigrated]
    );
    assert_eq!(backend.count("run trove-manage db_sync"), 1);
    assert_eq!(engine.shared().get(DB_SYNCED).unwrap(), synced);
}

#[test]
fn apply_rejects_leader_actions_on_follower() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let follower = signals("trove/1", "10.0.0.6", false, core_available());

    let err = engine.apply(Action::MigrateDatabase, &follower).unwrap_err();
    assert!(matches!(err, CoreError::NotLeader(ref a) if a == "migrate-database"));
    assert_eq!(backend.count("run"), 0);
}

#[test]
fn apply_refuses_out_of_order_milestone() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let err = engine.apply(Action::RenderFullConfig, &signals).unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    assert!(milestones(&engine).is_empty());
}

#[test]
fn concurrent_pass_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    let _held = StoreLock::acquire_now(&engine.layout().lock_file()).unwrap();
    assert!(matches!(
        engine.run_pass(&signals),
        Err(CoreError::StoreLocked(_))
    ));
    assert!(backend.calls().is_empty());
}

#[test]
fn interrupted_action_is_recovered_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    let journal = Journal::new(&layout);
    journal.begin("install", "trove/0").unwrap();
    assert_eq!(journal.list_incomplete().unwrap().len(), 1);

    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    assert!(journal.list_incomplete().unwrap().is_empty());

    // The interrupted action never wrote its milestone and runs again.
    let signals = signals("trove/0", "10.0.0.5", true, core_available());
    assert!(engine.plan(&signals).unwrap().contains(&Action::Install));
}

#[test]
fn passes_leave_no_journal_entries() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    backend.fail("install", 1);
    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    let signals = signals("trove/0", "10.0.0.5", true, core_available());

    engine.run_pass(&signals).unwrap();
    assert!(Journal::new(engine.layout())
        .list_incomplete()
        .unwrap()
        .is_empty());
}

#[test]
fn milestones_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let signals = signals("trove/0", "10.0.0.5", true, core_available());
    {
        let engine = engine(dir.path(), service(TROVE, ""), &backend);
        engine.run_pass(&signals).unwrap();
    }

    let engine = engine(dir.path(), service(TROVE, ""), &backend);
    assert_eq!(
        engine.plan(&signals).unwrap(),
        [Action::RegisterEndpoint, Action::MigrateDatabase]
    );
}

#[test]
fn ha_cluster_adds_haproxy_and_configures_resources() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(
        dir.path(),
        service(DESIGNATE, "vip = \"10.0.0.100\"\nnameservers = \"ns1.example.com.\""),
        &backend,
    );
    let mut deps = designate_available();
    deps.push(available(DependencyKind::Cluster));
    deps.push(available(DependencyKind::HaCluster));
    let signals = signals("designate/0", "10.0.0.5", true, deps);

    let report = engine.run_pass(&signals).unwrap();
    assert_eq!(
        report.planned,
        [
            Action::Install,
            Action::RenderBaseConfig,
            Action::UpdatePeers,
            Action::ConfigureHa
        ]
    );
    assert_eq!(backend.count("configure-ha vips haproxy"), 1);
    assert_eq!(backend.count("announce-peer 10.0.0.5"), 1);
    assert_eq!(
        backend.count("render /etc/designate/designate.conf /etc/haproxy/haproxy.cfg"),
        1
    );

    engine.converge(&signals, 10).unwrap();
    assert_eq!(backend.endpoints()[0].public_url, "http://10.0.0.100:9001");
    assert_eq!(engine.status(&signals).unwrap().level, StatusLevel::Active);
}

#[test]
fn sinks_without_nameservers_block_and_create_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(
        dir.path(),
        service(DESIGNATE, "[sinks.nova]\ndomain = \"nova.example.com.\""),
        &backend,
    );
    let signals = signals("designate/0", "10.0.0.5", true, designate_available());

    let reports = engine.converge(&signals, 10).unwrap();
    let last = reports.last().unwrap();
    assert_eq!(last.status.level, StatusLevel::Blocked);
    assert_eq!(
        last.status.message,
        "nameservers must be set when specifying sink domains"
    );
    assert!(engine
        .milestones()
        .unwrap()
        .contains(Milestone::RecordsInitialized));
    assert!(backend.servers().is_empty());
    assert!(backend.domains().is_empty());
    assert!(engine.shared().get(DOMAIN_INIT_DONE).unwrap().is_none());
}

#[test]
fn bootstrap_publishes_marker_only_when_ids_change() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let engine = engine(dir.path(), service(DESIGNATE, DESIGNATE_OPTIONS), &backend);
    let signals = signals("designate/0", "10.0.0.5", true, designate_available());

    let reports = engine.converge(&signals, 10).unwrap();
    assert!(reports.iter().all(|r| r.is_ok()));
    let marker = engine.shared().get(DOMAIN_INIT_DONE).unwrap().unwrap();
    assert_eq!(backend.count("run designate-utils domain-create"), 1);
    assert_eq!(backend.servers(), ["ns1.example.com."]);
    assert_eq!(
        backend.domains()["nova.example.com."].as_str(),
        "mock-domain-0001"
    );
    let status = engine.status(&signals).unwrap();
    assert_eq!(status.level, StatusLevel::Active);

    // The leader re-renders with the IDs it published.
    assert!(reports
        .iter()
        .any(|r| r.invalidated.contains(&Milestone::FullConfigRendered)));

    // Bootstrapping again finds every domain and leaves the marker alone.
    engine.invalidate(Milestone::RecordsInitialized).unwrap();
    engine.converge(&signals, 10).unwrap();
    assert_eq!(
        engine.shared().get(DOMAIN_INIT_DONE).unwrap().as_deref(),
        Some(marker.as_str())
    );
    assert_eq!(backend.count("run designate-utils domain-create"), 1);
}

#[test]
fn preexisting_domain_is_not_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new().with_domain("nova.example.com.", "abc123"));
    let engine = engine(dir.path(), service(DESIGNATE, DESIGNATE_OPTIONS), &backend);
    let signals = signals("designate/0", "10.0.0.5", true, designate_available());

    let reports = engine.converge(&signals, 10).unwrap();
    assert!(reports.iter().all(|r| r.is_ok()));
    assert_eq!(backend.count("run designate-utils domain-create"), 0);
    assert!(engine.shared().get(DOMAIN_INIT_DONE).unwrap().is_none());

    // The existing ID reaches the config without a published marker.
    let context = backend.rendered("/etc/designate/designate.conf").unwrap();
    assert_eq!(context["domain_ids"]["nova"], "abc123");
    assert_eq!(engine.status(&signals).unwrap().level, StatusLevel::Active);
}

#[test]
fn full_config_writes_rndc_keys_and_certificates() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let options = format!(
        "dns-slaves = \"10.0.0.10:53:c2VjcmV0\"\nssl-cert = \"CERT\"\nssl-key = \"KEY\"\n{DESIGNATE_OPTIONS}"
    );
    let engine = engine(dir.path(), service(DESIGNATE, &options), &backend);
    let signals = signals("designate/0", "10.0.0.5", true, designate_available());

    engine.converge(&signals, 10).unwrap();

    let (key, mode) = backend.file("/etc/designate/rndc_10_0_0_10.key").unwrap();
    assert_eq!(mode, 0o440);
    assert!(String::from_utf8(key)
        .unwrap()
        .contains("secret \"c2VjcmV0\";"));
    assert_eq!(
        backend.file("/etc/designate/ssl/cert.pem"),
        Some((b"CERT".to_vec(), 0o644))
    );
    assert_eq!(
        backend.file("/etc/designate/ssl/key.pem"),
        Some((b"KEY".to_vec(), 0o640))
    );
    assert!(backend.endpoints()[0].public_url.starts_with("https://"));
}

#[test]
fn reconfigure_clears_only_affected_milestones() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let mut engine = engine(dir.path(), service(DESIGNATE, DESIGNATE_OPTIONS), &backend);
    let signals = signals("designate/0", "10.0.0.5", true, designate_available());
    engine.converge(&signals, 10).unwrap();

    // Unchanged options clear nothing.
    let same = parse_options_str(DESIGNATE_OPTIONS).unwrap();
    assert!(engine.reconfigure(same).unwrap().is_empty());

    let more = parse_options_str(&DESIGNATE_OPTIONS.replace(
        "ns1.example.com.",
        "ns1.example.com. ns2.example.com.",
    ))
    .unwrap();
    assert_eq!(
        engine.reconfigure(more).unwrap(),
        [
            Milestone::FullConfigRendered,
            Milestone::RecordsInitialized,
            Milestone::PoolsUpdated
        ]
    );
    assert!(engine
        .milestones()
        .unwrap()
        .contains(Milestone::EndpointRegistered));

    engine.converge(&signals, 10).unwrap();
    assert_eq!(
        backend.servers(),
        ["ns1.example.com.", "ns2.example.com."]
    );

    let mut moved = engine.service().options.clone();
    moved.region = Some("RegionTwo".to_owned());
    let cleared = engine.reconfigure(moved).unwrap();
    assert!(cleared.contains(&Milestone::EndpointRegistered));

    engine.converge(&signals, 10).unwrap();
    assert_eq!(backend.endpoints().last().unwrap().region, "RegionTwo");
}
