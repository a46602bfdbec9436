#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arena_tournament::prelude::*;
use serde_json::{json, Value};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init_test_logger() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// An engine playing a fixed number of turns: every turn each client is asked for a command, and
/// every valid (non `INVALID`) answer is worth one point. The higher score wins, ties are draws.
#[derive(Default)]
pub struct CountingEngine {
    pub turns: usize,
    /// `(port, save file)` of every launch
    pub launches: Mutex<Vec<(u16, PathBuf)>>,
}

impl CountingEngine {
    pub fn new(turns: usize) -> Arc<Self> {
        Arc::new(Self {
            turns,
            launches: Mutex::new(vec![]),
        })
    }
}

struct Client {
    username: String,
    team: u8,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    points: u32,
}

impl Client {
    fn accept(listener: &TcpListener) -> io::Result<Client> {
        let (stream, _) = listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(20)))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let username = read_line(&mut reader)?;
        let team = read_line(&mut reader)?
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Client {
            username,
            team,
            reader,
            writer: stream,
            points: 0,
        })
    }

    fn send(&mut self, message: &Value) -> io::Result<()> {
        // every message is followed by an empty line
        writeln!(self.writer, "{message}\n")?;
        self.writer.flush()
    }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(line.trim_end().to_owned())
}

fn player(team: u8, x: f32, points: u32) -> Value {
    json!({
        "pos": {"x": x, "y": 0.0, "z": 0.0},
        "speed": {"x": 0.0, "y": 0.0, "z": 0.0},
        "health": 100,
        "team": team,
        "score": points,
        "state": "IDLE",
    })
}

fn play(listener: TcpListener, turns: usize) -> io::Result<Vec<(String, u32)>> {
    let mut clients = vec![Client::accept(&listener)?, Client::accept(&listener)?];
    clients.sort_by_key(|c| c.team);

    for _ in 0..turns {
        for i in 0..clients.len() {
            let other = &clients[1 - i];
            let other = player(other.team, 5.0, other.points);
            let client = &mut clients[i];
            let snapshot = json!({
                "controlledPlayer": player(client.team, -5.0, client.points),
                "otherPlayers": [other],
                "projectiles": [{"pos": {"x": "1.5", "y": 0, "z": 0}, "speed": {"x": 1, "y": 0, "z": 0}}],
            });
            client.send(&json!({"header": "ASK_COMMAND", "snapshot": snapshot}))?;
            let command: Value = serde_json::from_str(&read_line(&mut client.reader)?)?;
            if command["command_type"] != "INVALID" {
                client.points += 1;
            }
        }
    }

    let (p0, p1) = (clients[0].points, clients[1].points);
    let score = json!([
        {"team": clients[0].team, "username": clients[0].username, "score": p0, "won": p0 > p1},
        {"team": clients[1].team, "username": clients[1].username, "score": p1, "won": p1 > p0},
    ]);
    for client in &mut clients {
        client.send(&json!({"header": "GAME_FINISHED", "score": score}))?;
    }
    Ok(clients.into_iter().map(|c| (c.username, c.points)).collect())
}

struct FakeProcess(Option<JoinHandle<io::Result<Vec<(String, u32)>>>>);

impl EngineProcess for FakeProcess {
    fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        let Some(handle) = self.0.take() else {
            return Ok(None);
        };
        match handle.join() {
            Ok(Ok(_)) => Ok(Some(0)),
            Ok(Err(e)) => {
                tracing::warn!("fake engine failed: {e}");
                Ok(Some(1))
            }
            Err(_) => anyhow::bail!("fake engine panicked"),
        }
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Engine for CountingEngine {
    fn launch(
        &self,
        parameters: &EngineParameters,
        port: u16,
    ) -> anyhow::Result<Box<dyn EngineProcess>> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        self.launches
            .lock()
            .unwrap()
            .push((port, parameters.save_file.clone()));
        let turns = self.turns;
        let handle = thread::spawn(move || play(listener, turns));
        Ok(Box::new(FakeProcess(Some(handle))))
    }
}

/// An engine that starts but never listens on its port. It only exits when killed.
#[derive(Default)]
pub struct DeafEngine {
    pub kills: Arc<AtomicUsize>,
}

struct DeafProcess {
    killed: bool,
    kills: Arc<AtomicUsize>,
}

impl EngineProcess for DeafProcess {
    fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        while !self.killed {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(None)
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.killed = true;
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Engine for DeafEngine {
    fn launch(&self, _: &EngineParameters, _: u16) -> anyhow::Result<Box<dyn EngineProcess>> {
        Ok(Box::new(DeafProcess {
            killed: false,
            kills: Arc::clone(&self.kills),
        }))
    }
}

pub fn test_config(workers: usize, base_port: u16) -> Configuration {
    Configuration::new()
        .with_verbose(false)
        .with_workers(workers)
        .with_base_port(base_port)
        .with_settle_delay(Duration::from_millis(20))
        .with_save_dir("test_saves")
}

pub fn names(teams: &[&str]) -> Vec<String> {
    teams.iter().map(|t| t.to_string()).collect()
}
