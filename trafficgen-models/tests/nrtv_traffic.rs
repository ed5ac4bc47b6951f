//! Video streaming client and server talking over the simulated network

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use trafficgen_core::{Executor, Key, RandomStreams, SimTime, Simulation};
use trafficgen_models::nrtv::{
    NrtvClient, NrtvClientEvent, NrtvClientNotification, NrtvClientState, NrtvServer, NrtvServerEvent,
    NrtvServerNotification,
};
use trafficgen_models::transport::{NetworkConfig, SimNetwork, SimNetworkHandle, StreamTransport};
use trafficgen_models::{NrtvVariables, NrtvVariablesConfig};

type Log<T> = Arc<Mutex<Vec<T>>>;

fn server_address() -> SocketAddr {
    "10.0.0.2:554".parse().unwrap()
}

/// Single-frame videos with a fixed 15 ms encoding delay.
fn one_frame_config() -> NrtvVariablesConfig {
    NrtvVariablesConfig {
        num_of_frames_mean: 1e-6,
        slice_encode_delay_scale_ms: 15.0,
        slice_encode_delay_max_ms: 15.0,
        idle_time_mean_ms: 1_000.0,
        ..Default::default()
    }
}

struct Setup {
    sim: Simulation,
    network: SimNetworkHandle,
    server: Key<NrtvServerEvent>,
    client: Key<NrtvClientEvent>,
    client_log: Log<NrtvClientNotification>,
    server_log: Log<NrtvServerNotification>,
}

fn setup(network_config: NetworkConfig, config: NrtvVariablesConfig) -> Setup {
    let mut sim = Simulation::default();
    let mut streams = RandomStreams::new(11);
    let network = SimNetwork::install(&mut sim, network_config).unwrap();

    let server_log: Log<NrtvServerNotification> = Arc::new(Mutex::new(Vec::new()));
    let log = server_log.clone();
    let vars = NrtvVariables::new(config.clone(), &mut streams).unwrap();
    let server = NrtvServer::new("video-server", network.clone(), server_address(), vars)
        .with_observer(move |_, n| log.lock().unwrap().push(n.clone()));
    let server = sim.add_component(server);

    let client_log: Log<NrtvClientNotification> = Arc::new(Mutex::new(Vec::new()));
    let log = client_log.clone();
    let vars = NrtvVariables::new(config, &mut streams).unwrap();
    let client = NrtvClient::new("viewer", network.clone(), server_address(), vars)
        .with_observer(move |_, n| log.lock().unwrap().push(n.clone()));
    let client = sim.add_component(client);

    sim.schedule(SimTime::zero(), server, NrtvServerEvent::Start);
    sim.schedule(SimTime::from_millis(1), client, NrtvClientEvent::Start);
    Setup {
        sim,
        network,
        server,
        client,
        client_log,
        server_log,
    }
}

fn client_mut(setup: &mut Setup) -> &mut NrtvClient<SimNetworkHandle> {
    setup
        .sim
        .get_component_mut::<NrtvClientEvent, NrtvClient<SimNetworkHandle>>(setup.client)
        .unwrap()
}

fn server_mut(setup: &mut Setup) -> &mut NrtvServer<SimNetworkHandle> {
    setup
        .sim
        .get_component_mut::<NrtvServerEvent, NrtvServer<SimNetworkHandle>>(setup.server)
        .unwrap()
}

#[test]
fn slow_encoder_serves_six_of_eight_slices() {
    let config = NrtvVariablesConfig {
        idle_time_mean_ms: 1e7,
        ..one_frame_config()
    };
    let mut setup = setup(NetworkConfig::default(), config);
    // past the end of the first video, before the idle time can elapse
    setup.sim.execute(Executor::timed(SimTime::from_millis(150)));

    let server = server_mut(&mut setup);
    assert_eq!(server.stats().slices_served, 6);
    assert_eq!(server.stats().slices_skipped, 2);
    assert_eq!(server.stats().videos_finished, 1);
    let sizes = server.metrics().histogram("slice_size", "video-server").unwrap();
    assert_eq!(sizes.count, 6);
    assert!(sizes.min >= 40.0 && sizes.max <= 250.0);

    let slices: Vec<u16> = setup
        .client_log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| match n {
            NrtvClientNotification::SliceReceived { slice_number, .. } => Some(*slice_number),
            _ => None,
        })
        .collect();
    assert_eq!(slices, vec![0, 1, 2, 3, 4, 5]);
    // the last slice of the frame was never produced
    assert_eq!(client_mut(&mut setup).stats().frames_received, 0);
}

#[test]
fn fragmented_stream_reassembles_every_slice() {
    let config = NrtvVariablesConfig {
        num_of_frames_mean: 1e6,
        ..Default::default()
    };
    // tiny segments split headers and put slice boundaries inside segments
    let network = NetworkConfig::default().with_segment_size(7).with_tx_buffer_size(512);
    let mut setup = setup(network, config);
    setup.sim.execute(Executor::timed(SimTime::from_secs(3)));

    let served: Vec<(u32, u16, u32)> = setup
        .server_log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| match n {
            NrtvServerNotification::SliceServed {
                frame_number,
                slice_number,
                size,
                ..
            } => Some((*frame_number, *slice_number, *size)),
            _ => None,
        })
        .collect();
    let received: Vec<(u32, u16, u32)> = setup
        .client_log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| match n {
            NrtvClientNotification::SliceReceived {
                frame_number,
                slice_number,
                size,
            } => Some((*frame_number, *slice_number, *size)),
            _ => None,
        })
        .collect();
    assert!(received.len() > 100);
    assert_eq!(received, served[..received.len()].to_vec());
}

#[test]
fn finished_video_idles_then_reconnects() {
    let mut setup = setup(NetworkConfig::default(), one_frame_config());
    setup.sim.execute(Executor::timed(SimTime::from_secs(30)));

    let client = client_mut(&mut setup);
    let videos = client.stats().videos_completed;
    assert!(videos >= 3);
    // six slices per video, plus part of the one in progress
    let slices = client.stats().slices_received;
    assert!(slices >= 6 * videos && slices < 6 * (videos + 1));
    assert_eq!(client.stats().reconnects, 0);

    let idle_periods = setup
        .client_log
        .lock()
        .unwrap()
        .iter()
        .filter(|n| matches!(n, NrtvClientNotification::IdleStarted { .. }))
        .count() as u64;
    assert_eq!(idle_periods, videos);
    assert!(server_mut(&mut setup).stats().connections_accepted >= videos);
}

#[test]
fn reset_connection_reconnects_immediately() {
    let config = NrtvVariablesConfig {
        num_of_frames_mean: 1e6,
        ..Default::default()
    };
    let mut setup = setup(NetworkConfig::default(), config);
    setup.sim.execute(Executor::timed(SimTime::from_secs(1)));

    let server_conn = setup
        .server_log
        .lock()
        .unwrap()
        .iter()
        .find_map(|n| match n {
            NrtvServerNotification::ConnectionAccepted { conn, .. } => Some(*conn),
            _ => None,
        })
        .unwrap();
    setup.network.abort(setup.sim.scheduler_mut(), server_conn);
    setup.sim.execute(Executor::timed(SimTime::from_secs(2)));

    let client = client_mut(&mut setup);
    assert_eq!(client.stats().reconnects, 1);
    assert_eq!(client.stats().videos_completed, 0);
    assert_eq!(client.state(), NrtvClientState::Receiving);
    assert_eq!(server_mut(&mut setup).stats().connections_accepted, 2);
}

#[test]
fn stop_closes_workers_and_listener() {
    let config = NrtvVariablesConfig {
        num_of_frames_mean: 1e6,
        idle_time_mean_ms: 1e7,
        ..Default::default()
    };
    let mut setup = setup(NetworkConfig::default(), config);
    setup.sim.schedule(SimTime::from_millis(500), setup.server, NrtvServerEvent::Stop);
    setup.sim.execute(Executor::timed(SimTime::from_millis(520)));

    let server = server_mut(&mut setup);
    assert_eq!(server.workers(), 0);
    assert_eq!(server.listener(), None);
    // the server closing ends the video as far as the client is concerned
    assert_eq!(client_mut(&mut setup).state(), NrtvClientState::Idle);
}

#[test]
#[should_panic(expected = "listener closed while the server is started")]
fn listener_closing_under_a_started_server_is_fatal() {
    let mut setup = setup(NetworkConfig::default(), one_frame_config());
    setup.sim.execute(Executor::timed(SimTime::from_millis(50)));
    let listener = server_mut(&mut setup).listener().unwrap();
    setup.network.close_listener(setup.sim.scheduler_mut(), listener);
    setup.sim.execute(Executor::timed(SimTime::from_millis(100)));
}
