//! Transport tests for dt-net.

#[cfg(test)]
mod helpers {
    use std::time::Duration;

    use dt_core::{RoadGraphSource, SimConfig, SyncMode, TrafficLightTiming, VehicleQuotas};

    /// Long enough for a few hundred steps on loopback.
    pub const RUN_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn small_config(workers: usize, mode: SyncMode) -> SimConfig {
        SimConfig {
            num_workers: workers,
            sync_mode: mode,
            max_steps: 40,
            stops_at_max_steps: true,
            steps_per_second: 1,
            quotas: VehicleQuotas::new(12, 0, 0),
            traffic_light_timing: TrafficLightTiming::None,
            road_graph: RoadGraphSource::Builtin { rows: 2, cols: 4, spacing_m: 150.0 },
            max_cell_size_m: 300.0,
            report_interval_steps: 5,
            ..SimConfig::default()
        }
    }
}

#[cfg(test)]
mod frames {
    use dt_core::Step;
    use dt_proto::wire::encode_frame;
    use dt_proto::{Message, ProtoError};
    use tokio::io::{duplex, AsyncWriteExt};

    use crate::{read_frame, write_frame, NetError};

    #[tokio::test]
    async fn messages_cross_a_stream_in_order() {
        let (mut a, mut b) = duplex(64);
        let sent = vec![
            Message::ShareTraffic { step: Step(3) },
            Message::ServerlessPause { step: Step(9) },
            Message::KillWorker { is_shared_process_space: true },
        ];
        let writer = {
            let sent = sent.clone();
            tokio::spawn(async move {
                for m in &sent {
                    write_frame(&mut a, m).await.unwrap();
                }
            })
        };
        let mut got = Vec::new();
        while let Some(m) = read_frame(&mut b).await.unwrap() {
            got.push(m);
        }
        writer.await.unwrap();
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (a, mut b) = duplex(16);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        let (mut a, mut b) = duplex(256);
        let frame = encode_frame(&Message::ShareTraffic { step: Step(1) }).unwrap();
        a.write_all(&frame[..frame.len() - 1]).await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(NetError::Truncated)));

        let (mut a, mut b) = duplex(16);
        a.write_all(b"DTS").await.unwrap();
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(NetError::Truncated)));
    }

    #[tokio::test]
    async fn foreign_bytes_are_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(NetError::Proto(ProtoError::BadMagic(_)))));
    }
}

#[cfg(test)]
mod end_to_end {
    use std::time::Duration;

    use dt_coord::{NoopObserver, Phase, ServerCommand, Termination};
    use dt_core::{Step, SyncMode};
    use dt_mobility::LaneEngine;
    use dt_proto::Message;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    use super::helpers::*;
    use crate::{read_frame, spawn_local_worker, write_frame, Server, WorkerExit};

    async fn full_run(mode: SyncMode) {
        let server = Server::bind("127.0.0.1:0", small_config(2, mode)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        let addr = handle.local_addr().to_string();
        let workers: Vec<_> = (0..2)
            .map(|i| spawn_local_worker(addr.clone(), format!("w{i}"), LaneEngine::new()))
            .collect();

        let summary = timeout(RUN_TIMEOUT, handle.run_to_end(2)).await.unwrap().unwrap();
        assert_eq!(summary.reason, Termination::MaxSteps);
        assert_eq!(summary.final_step, Step(40));

        handle.command(ServerCommand::KillAll { shared_process: true }).await.unwrap();
        for w in workers {
            let exit = timeout(RUN_TIMEOUT, w).await.unwrap().unwrap().unwrap();
            assert_eq!(exit, WorkerExit::Killed { shared_process: true });
        }
        let idle = timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 0)).await.unwrap().unwrap();
        assert_eq!(idle.phase, Phase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bsp_run_over_tcp() {
        full_run(SyncMode::Bsp).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn psp_run_over_tcp() {
        full_run(SyncMode::Psp).await;
    }

    #[tokio::test]
    async fn surplus_worker_is_refused() {
        let server = Server::bind("127.0.0.1:0", small_config(1, SyncMode::Bsp)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        let addr = handle.local_addr().to_string();

        let first = spawn_local_worker(addr.clone(), "w0".into(), LaneEngine::new());
        timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 1)).await.unwrap().unwrap();
        let second = spawn_local_worker(addr.clone(), "w1".into(), LaneEngine::new());
        let exit = timeout(RUN_TIMEOUT, second).await.unwrap().unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Killed { shared_process: false });
        assert_eq!(handle.status().joined, 1);

        handle.command(ServerCommand::KillAll { shared_process: true }).await.unwrap();
        timeout(RUN_TIMEOUT, first).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn commands_are_checked_against_the_phase() {
        let server = Server::bind("127.0.0.1:0", small_config(2, SyncMode::Bsp)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        assert!(handle.command(ServerCommand::Start).await.is_err());
        assert!(handle.command(ServerCommand::Setup).await.is_err(), "no workers yet");
        assert_eq!(handle.status().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn losing_a_worker_during_setup_returns_to_idle() {
        let server = Server::bind("127.0.0.1:0", small_config(2, SyncMode::Bsp)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        let addr = handle.local_addr().to_string();
        let real = spawn_local_worker(addr.clone(), "w0".into(), LaneEngine::new());

        // A worker that joins and then never answers setup.
        let mut fake = TcpStream::connect(&addr).await.unwrap();
        let join = Message::Join { name: "silent".into(), address: "127.0.0.1".into(), port: 1 };
        write_frame(&mut fake, &join).await.unwrap();
        timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 2)).await.unwrap().unwrap();

        handle.command(ServerCommand::Setup).await.unwrap();
        assert!(matches!(read_frame(&mut fake).await.unwrap(), Some(Message::Setup(_))));
        assert_eq!(handle.status().phase, Phase::SettingUp);

        drop(fake);
        let idle = timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 1)).await.unwrap().unwrap();
        assert_eq!(idle.phase, Phase::Idle);
        assert!(handle.command(ServerCommand::Start).await.is_err());

        handle.command(ServerCommand::KillAll { shared_process: true }).await.unwrap();
        timeout(RUN_TIMEOUT, real).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn wildcard_listener_is_dialled_on_loopback() {
        let server = Server::bind("0.0.0.0:0", small_config(1, SyncMode::Bsp)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        let addr = handle.connect_addr();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), handle.local_addr().port());

        let worker = spawn_local_worker(addr.to_string(), "w0".into(), LaneEngine::new());
        timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 1)).await.unwrap().unwrap();
        handle.command(ServerCommand::KillAll { shared_process: true }).await.unwrap();
        timeout(RUN_TIMEOUT, worker).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn frames_under_another_workers_name_are_dropped() {
        let server = Server::bind("127.0.0.1:0", small_config(2, SyncMode::Bsp)).await.unwrap();
        let handle = server.spawn(Box::new(NoopObserver)).unwrap();
        let addr = handle.local_addr().to_string();

        let mut a = TcpStream::connect(&addr).await.unwrap();
        let mut b = TcpStream::connect(&addr).await.unwrap();
        for (conn, name) in [(&mut a, "a"), (&mut b, "b")] {
            let join = Message::Join { name: name.into(), address: "127.0.0.1".into(), port: 1 };
            write_frame(conn, &join).await.unwrap();
        }
        timeout(RUN_TIMEOUT, handle.wait_until(|s| s.joined == 2)).await.unwrap().unwrap();

        handle.command(ServerCommand::Setup).await.unwrap();
        for conn in [&mut a, &mut b] {
            assert!(matches!(read_frame(conn).await.unwrap(), Some(Message::Setup(_))));
        }

        // `b` answers for itself and for `a`.
        for name in ["b", "a"] {
            let done = Message::SetupDone { worker_name: name.into(), num_fellows: 1 };
            write_frame(&mut b, &done).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status().phase, Phase::SettingUp);

        let done = Message::SetupDone { worker_name: "a".into(), num_fellows: 1 };
        write_frame(&mut a, &done).await.unwrap();
        let ready = timeout(RUN_TIMEOUT, handle.wait_until(|s| s.phase == Phase::Ready)).await.unwrap().unwrap();
        assert_eq!(ready.joined, 2);
    }
}
