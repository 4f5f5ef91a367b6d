//! Demo node: a root endpoint plus a dimmable light, persisted to a JSON
//! key-value file. Run it repeatedly to watch the light state and the
//! endpoint id counter survive restarts.
//!
//! Usage:
//!   cargo run -- --toggles 3
//!   cargo run -- --bridged
//!   cargo run -- --reset

use clap::Parser;
use log::{error, info};
use matter_node_store::config::{Config, load_dotenv};
use matter_node_store::matter::attribute::{AttributeCallback, UserData};
use matter_node_store::matter::clusters::identify::{self, IdentifyAction, IdentifyType};
use matter_node_store::matter::clusters::{level_control, on_off};
use matter_node_store::matter::command::CommandCallback;
use matter_node_store::matter::device_types::{
    DEV_TYPE_BRIDGED_NODE, DEV_TYPE_DIMMABLE_LIGHT, DEV_TYPE_ON_OFF_PLUG_IN_UNIT,
    DEV_TYPE_ROOT_NODE,
};
use matter_node_store::matter::{
    AttrValue, AttributePath, CallbackPhase, ClusterFlags, CommandPath, DataModel, EndpointFlags,
    Node,
};
use matter_node_store::persistence::FileKvStore;
use matter_node_store::scheduler::TokioScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Endpoints created on every boot before the node starts
const STATIC_ENDPOINT_COUNT: u16 = 2;

#[derive(Parser)]
#[command(name = "matter-node-store")]
#[command(about = "Build a dimmable light node and exercise its persisted state")]
struct Cli {
    /// Key-value store file
    #[arg(long, env = "MATTER_STORAGE_PATH")]
    storage: Option<PathBuf>,

    /// Number of OnOff toggles to send to the light
    #[arg(long, default_value_t = 1)]
    toggles: u32,

    /// Add a bridged plug-in unit endpoint
    #[arg(long)]
    bridged: bool,

    /// Wipe the store before starting
    #[arg(long)]
    reset: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn log_updates() -> AttributeCallback {
    Arc::new(
        |phase: CallbackPhase, path: &AttributePath, value: &mut AttrValue, _: Option<&UserData>| {
            if phase == CallbackPhase::PostUpdate {
                info!("Attribute {} = {}", path, value);
            }
            Ok(())
        },
    )
}

fn log_commands() -> CommandCallback {
    Arc::new(|path: &CommandPath, _: &[u8]| {
        info!("Command {} handled", path);
        Ok(())
    })
}

/// Recreate the static endpoints, start the node and resume the endpoints
/// created at runtime in earlier boots.
fn build(node: &mut Node, bridged: bool) -> matter_node_store::Result<u16> {
    node.set_callback(log_updates());
    node.set_identification_callback(Arc::new(
        |action: IdentifyAction, endpoint_id: u16, kind: IdentifyType| {
            info!("Identify {:?} on endpoint {} ({:?})", action, endpoint_id, kind);
        },
    ));

    let root = node.create_endpoint(EndpointFlags::empty(), None)?;
    root.add_device_type(DEV_TYPE_ROOT_NODE)?;
    let root_id = root.id();

    let light = node.create_endpoint(EndpointFlags::empty(), None)?;
    light.add_device_type(DEV_TYPE_DIMMABLE_LIGHT)?;
    let light_id = light.id();
    identify::create(light, ClusterFlags::SERVER, IdentifyType::LightOutput)?;
    on_off::create(light, ClusterFlags::SERVER, false, Some(log_commands()))?;
    level_control::create(light, ClusterFlags::SERVER, Some(level_control::MAX_LEVEL))?;
    node.attribute_mut(&on_off_path(light_id))?
        .set_deferred_persistence()?;

    node.start()?;

    for id in STATIC_ENDPOINT_COUNT..node.min_unused_endpoint_id() {
        let endpoint = node.resume_endpoint(EndpointFlags::DESTROYABLE, id, None)?;
        add_plug(endpoint)?;
        node.set_parent_endpoint(id, root_id)?;
    }
    if bridged {
        let plug = node.create_endpoint(EndpointFlags::DESTROYABLE, None)?;
        let plug_id = plug.id();
        add_plug(plug)?;
        node.set_parent_endpoint(plug_id, root_id)?;
        info!("Added bridged plug on endpoint {}", plug_id);
    }
    node.enable_all();
    Ok(light_id)
}

fn add_plug(endpoint: &mut matter_node_store::matter::Endpoint) -> matter_node_store::Result<()> {
    endpoint.add_device_type(DEV_TYPE_BRIDGED_NODE)?;
    endpoint.add_device_type(DEV_TYPE_ON_OFF_PLUG_IN_UNIT)?;
    on_off::create(endpoint, ClusterFlags::SERVER, false, Some(log_commands()))?;
    Ok(())
}

fn on_off_path(endpoint_id: u16) -> AttributePath {
    AttributePath::new(
        endpoint_id,
        on_off::CLUSTER_ID,
        on_off::OnOffAttribute::OnOff as u32,
    )
}

fn toggle(node: &mut Node, endpoint_id: u16) -> matter_node_store::Result<()> {
    node.invoke_command(
        &CommandPath::new(
            endpoint_id,
            on_off::CLUSTER_ID,
            on_off::OnOffCommand::Toggle as u32,
        ),
        &[],
    )?;
    let path = on_off_path(endpoint_id);
    let on = node.get_value(&path)?.as_bool().unwrap_or(false);
    node.set_value(path, AttrValue::boolean(!on), true)?;
    Ok(())
}

fn summary(node: &Node) {
    info!(
        "Node: {} endpoints, next endpoint id {}",
        node.endpoint_count(),
        node.min_unused_endpoint_id()
    );
    for endpoint in node.endpoints() {
        let device_types: Vec<String> = endpoint
            .device_types()
            .iter()
            .map(|d| format!("0x{:04X}", d.id))
            .collect();
        let on = node
            .get_value(&on_off_path(endpoint.id()))
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "-".to_string());
        info!(
            "  Endpoint {}: device types [{}], {} clusters, on/off {}",
            endpoint.id(),
            device_types.join(", "),
            endpoint.cluster_count(),
            on
        );
    }
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.storage {
        config.storage.path = path;
    }
    info!("Storage: {}", config.storage.path.display());

    let store = Arc::new(FileKvStore::open(&config.storage.path));
    if cli.reset {
        if let Err(e) = store.clear() {
            error!("Failed to reset store: {}", e);
            std::process::exit(1);
        }
        info!("Store reset");
    }
    let scheduler = match TokioScheduler::current() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let data_model = DataModel::new(config.data_model.clone(), store, scheduler).into_shared();
    {
        let mut dm = data_model.lock();
        let node = dm.create_raw();
        let result = build(node, cli.bridged).and_then(|light_id| {
            for _ in 0..cli.toggles {
                toggle(node, light_id)?;
            }
            node.identify(light_id, IdentifyAction::Start)?;
            node.identify(light_id, IdentifyAction::Stop)
        });
        if let Err(e) = result {
            error!("Failed to build node: {}", e);
            std::process::exit(1);
        }
    }

    // let deferred writes land before exiting
    tokio::time::sleep(config.data_model.deferred_persistence_delay() + Duration::from_millis(200))
        .await;

    let dm = data_model.lock();
    if let Ok(node) = dm.node() {
        summary(node);
    }
}
