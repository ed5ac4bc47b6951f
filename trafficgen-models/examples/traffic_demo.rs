//! Web browsing and video streaming traffic sharing one simulated network
//!
//! Run with: cargo run --package trafficgen-models --example traffic_demo [seconds]
//!
//! Set RUST_LOG=debug to follow every state change.

use tracing::info;
use trafficgen_core::{init_simulation_logging, Executor, RandomStreams, SimTime, Simulation};
use trafficgen_models::http::{HttpClient, HttpClientEvent, HttpServer, HttpServerEvent};
use trafficgen_models::nrtv::{NrtvClient, NrtvClientEvent, NrtvServer, NrtvServerEvent};
use trafficgen_models::transport::{NetworkConfig, SimNetwork, SimNetworkHandle};
use trafficgen_models::{HttpVariables, HttpVariablesConfig, NrtvVariables, NrtvVariablesConfig};

const BROWSERS: usize = 3;
const VIEWERS: usize = 2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_simulation_logging();

    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 300,
    };

    let mut sim = Simulation::default().with_name("traffic-demo");
    let mut streams = RandomStreams::new(2024);
    let network = SimNetwork::install(
        &mut sim,
        NetworkConfig::default()
            .with_latency_ms(20.0)
            .with_tx_buffer_size(64 * 1024),
    )?;

    let web_address = "192.168.1.10:80".parse()?;
    let video_address = "192.168.1.11:554".parse()?;

    // shorter reading times than the calibrated defaults so a short run still loads pages
    let http_config = HttpVariablesConfig::from_json_str(r#"{ "reading_time_mean_ms": 5000.0 }"#)?;
    let nrtv_config = NrtvVariablesConfig {
        num_of_frames_mean: 300.0,
        ..Default::default()
    };

    let vars = HttpVariables::new(http_config.clone(), &mut streams)?;
    let web_server = sim.add_component(HttpServer::new("web-server", network.clone(), web_address, vars));
    sim.schedule(SimTime::zero(), web_server, HttpServerEvent::Start);

    let vars = NrtvVariables::new(nrtv_config.clone(), &mut streams)?;
    let video_server = sim.add_component(NrtvServer::new("video-server", network.clone(), video_address, vars));
    sim.schedule(SimTime::zero(), video_server, NrtvServerEvent::Start);

    let mut browsers = Vec::with_capacity(BROWSERS);
    for i in 0..BROWSERS {
        let vars = HttpVariables::new(http_config.clone(), &mut streams)?;
        let client = HttpClient::new(format!("browser-{i}"), network.clone(), web_address, vars);
        let key = sim.add_component(client);
        // staggered so the page loads do not line up
        sim.schedule(SimTime::from_millis(10 + 250 * i as u64), key, HttpClientEvent::Start);
        browsers.push(key);
    }

    let mut viewers = Vec::with_capacity(VIEWERS);
    for i in 0..VIEWERS {
        let vars = NrtvVariables::new(nrtv_config.clone(), &mut streams)?;
        let client = NrtvClient::new(format!("viewer-{i}"), network.clone(), video_address, vars);
        let key = sim.add_component(client);
        sim.schedule(SimTime::from_millis(10 + 500 * i as u64), key, NrtvClientEvent::Start);
        viewers.push(key);
    }

    info!(seconds, browsers = BROWSERS, viewers = VIEWERS, "Running traffic demo");
    sim.execute(Executor::timed(SimTime::from_secs(seconds)));

    for key in browsers {
        if let Some(client) = sim.get_component_mut::<HttpClientEvent, HttpClient<SimNetworkHandle>>(key) {
            info!(client = %client.name, state = %client.state(), stats = ?client.stats(), "Browser finished");
        }
    }
    for key in viewers {
        if let Some(client) = sim.get_component_mut::<NrtvClientEvent, NrtvClient<SimNetworkHandle>>(key) {
            info!(client = %client.name, state = %client.state(), stats = ?client.stats(), "Viewer finished");
        }
    }
    if let Some(server) = sim.get_component_mut::<HttpServerEvent, HttpServer<SimNetworkHandle>>(web_server) {
        info!(server = %server.name, stats = ?server.stats(), metrics = %server.metrics().summary(), "Web server finished");
    }
    if let Some(server) = sim.get_component_mut::<NrtvServerEvent, NrtvServer<SimNetworkHandle>>(video_server) {
        let slice_sizes = server.metrics().histogram("slice_size", &server.name);
        info!(server = %server.name, stats = ?server.stats(), ?slice_sizes, "Video server finished");
    }
    info!(stats = ?network.stats(), open = network.open_connections(), "Network totals");

    Ok(())
}
