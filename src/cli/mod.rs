use colored::Colorize;
use fleet::{
    Policy, Registry,
    agent::{AgentConfig, AgentId, Availability, ConfigPatch},
    config, helpers,
    store::DumpStore,
    transport::WsTransport,
};
use macros_rs::crashln;
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

pub(crate) fn get_version() -> String { format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")) }

/// Builds the registry from the config file and the persisted services.
pub(crate) fn open() -> Arc<Registry> {
    let base = match config::base_dir() {
        Ok(base) => base,
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    };
    let config = match config::read_from(&base) {
        Ok(config) => config,
        Err(err) => crashln!("{} Cannot read config.\n{}", *helpers::FAIL, format!("{err:#}").white()),
    };
    let store = match DumpStore::open(config.store_path(&base)) {
        Ok(store) => store,
        Err(err) => crashln!("{} Cannot open service dump.\n{}", *helpers::FAIL, format!("{err:#}").white()),
    };

    let registry = Arc::new(Registry::new(Arc::new(WsTransport::new()), Arc::new(store), config.settings()));
    if let Err(err) = registry.restore() {
        crashln!("{} Cannot restore services.\n{}", *helpers::FAIL, format!("{err:#}").white());
    }
    if let Some(interval) = config.reconnect_interval() {
        registry.spawn_reconnect(interval);
    }

    registry
}

fn settle_window(registry: &Registry) -> Duration { registry.settings().connect_timeout + Duration::from_millis(250) }

fn parse_params(params: &Option<String>) -> Value {
    match params {
        None => Value::Object(Default::default()),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => crashln!("{} Params are not valid JSON: {}", *helpers::FAIL, err.to_string().white()),
        },
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => crashln!("{} Cannot encode output.\n{}", *helpers::FAIL, err.to_string().white()),
    }
}

fn colored_availability(availability: Availability) -> colored::ColoredString {
    match availability {
        Availability::Available => availability.to_string().green(),
        Availability::Unavailable => availability.to_string().red(),
        Availability::Unknown => availability.to_string().yellow(),
    }
}

pub(crate) async fn add(registry: &Registry, host: &str, port: u16, key: &str, remarks: &Option<String>) {
    let config = AgentConfig::new(host, port, key).with_remarks(remarks.clone().unwrap_or_default());

    let id = match registry.register(config) {
        Ok(id) => id,
        Err(err) => crashln!("{} Cannot add agent: {err}", *helpers::FAIL),
    };

    println!("{} Added agent {} ({host}:{port})", *helpers::SUCCESS, id.to_string().bold());
    registry.settle(settle_window(registry)).await;

    if let Ok(snapshot) = registry.get(&id) {
        println!("{} {} is {}", *helpers::SUCCESS, id, colored_availability(snapshot.availability));
    }
}

pub(crate) fn edit(registry: &Registry, id: &str, patch: ConfigPatch) {
    if patch.is_empty() {
        println!("{} Nothing to change", *helpers::WARN);
        return;
    }

    match registry.edit(&AgentId::from(id), &patch) {
        Ok(()) => println!("{} Updated agent {id}", *helpers::SUCCESS),
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    }
}

pub(crate) fn remove(registry: &Registry, id: &str) {
    match registry.remove(&AgentId::from(id)) {
        Ok(()) => println!("{} Removed agent {id}", *helpers::SUCCESS),
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    }
}

pub(crate) async fn list(registry: &Registry, format: &str) {
    registry.settle(settle_window(registry)).await;
    let agents = registry.list();

    if format == "json" {
        return print_json(&agents);
    }
    if agents.is_empty() {
        return println!("{} No agents registered", *helpers::WARN);
    }

    for agent in agents {
        println!(
            "{}  {:<21}  {:<11}  {:>4}  {}",
            agent.id.to_string().bold(),
            agent.address.to_string(),
            colored_availability(agent.availability),
            helpers::format_duration(agent.registered_at),
            agent.remarks
        );
    }
}

pub(crate) async fn link(registry: &Registry, id: &str) {
    let connection = match registry.connection(&AgentId::from(id)) {
        Ok(connection) => connection,
        Err(err) => crashln!("{} {err}", *helpers::FAIL),
    };

    connection.connect().await;
    println!("{} {id} is {}", *helpers::SUCCESS, colored_availability(connection.availability()));
}

pub(crate) async fn relay(registry: &Registry, id: &str, command: &str, params: &Option<String>) {
    let params = parse_params(params);
    registry.settle(settle_window(registry)).await;

    match registry.relay(&AgentId::from(id), command, params).await {
        Ok(response) => print_json(&response),
        Err(err) => crashln!("{} {command} failed: {err}", *helpers::FAIL),
    }
}

pub(crate) async fn broadcast(registry: &Registry, command: &str, params: &Option<String>, successes: bool) {
    let params = parse_params(params);
    let policy = if successes { Policy::CollectSuccesses } else { Policy::CollectAll };
    registry.settle(settle_window(registry)).await;

    let entries = registry.broadcast(command, params, policy).await;
    if policy == Policy::CollectSuccesses {
        let payloads: Vec<_> = entries.into_iter().filter_map(|entry| entry.result.ok()).collect();
        return print_json(&payloads);
    }

    print_json(&entries);
}

pub(crate) async fn overview(registry: &Registry, command: &str) {
    registry.settle(settle_window(registry)).await;
    print_json(&registry.overview(command, Value::Object(Default::default())).await);
}
