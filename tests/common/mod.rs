//! Scripted in-memory transport for driving sessions without a controller

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use unipi_evok::{EvokError, Request, Result, Transport};

/// What one `receive` call yields
#[derive(Debug, Clone)]
pub enum Frame {
    Message(Value),
    /// Nothing received (stream ended)
    Empty,
    /// Peer closed the connection
    Closed,
    /// Unexpected failure
    Fail(&'static str),
}

/// Something the supervisor did to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConnectAttempt,
    Sent(Value),
    Closed,
}

#[derive(Default)]
struct Script {
    connects: VecDeque<bool>,
    connections: VecDeque<Vec<Frame>>,
    current: VecDeque<Frame>,
    events: Vec<(Instant, Event)>,
}

/// Test-side handle to inspect and steer a [`ScriptedTransport`]
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
    wake: Arc<Notify>,
}

impl ScriptHandle {
    /// Queue the outcome of the next connect attempts (default: success)
    pub fn connect_outcomes(&self, outcomes: &[bool]) -> &Self {
        self.script.lock().unwrap().connects.extend(outcomes.iter().copied());
        self
    }

    /// Queue the frames served by the next successful connection
    pub fn connection(&self, frames: Vec<Frame>) -> &Self {
        self.script.lock().unwrap().connections.push_back(frames);
        self
    }

    /// Deliver a frame on the live connection
    pub fn push(&self, frame: Frame) {
        self.script.lock().unwrap().current.push_back(frame);
        self.wake.notify_one();
    }

    pub fn events(&self) -> Vec<Event> {
        self.script
            .lock()
            .unwrap()
            .events
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Offsets of every connect attempt from the first one
    pub fn connect_offsets(&self) -> Vec<Duration> {
        let script = self.script.lock().unwrap();
        let attempts: Vec<Instant> = script
            .events
            .iter()
            .filter(|(_, event)| *event == Event::ConnectAttempt)
            .map(|(at, _)| *at)
            .collect();
        attempts.iter().map(|at| *at - attempts[0]).collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }

    /// Number of full-state requests sent
    pub fn syncs(&self) -> usize {
        self.count(&Event::Sent(json!({"cmd": "all"})))
    }
}

pub struct ScriptedTransport {
    handle: ScriptHandle,
    connected: bool,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle {
            script: Arc::new(Mutex::new(Script::default())),
            wake: Arc::new(Notify::new()),
        };
        (
            Self {
                handle: handle.clone(),
                connected: false,
            },
            handle,
        )
    }

    fn record(&self, event: Event) {
        self.handle
            .script
            .lock()
            .unwrap()
            .events
            .push((Instant::now(), event));
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        self.record(Event::ConnectAttempt);
        let mut script = self.handle.script.lock().unwrap();
        if !script.connects.pop_front().unwrap_or(true) {
            return Err(EvokError::InvalidResponse("connection refused".to_string()));
        }
        let frames = script.connections.pop_front().unwrap_or_default();
        script.current = frames.into();
        drop(script);
        self.connected = true;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        if !self.connected {
            return Err(EvokError::NotConnected);
        }
        loop {
            let next = self.handle.script.lock().unwrap().current.pop_front();
            match next {
                Some(Frame::Message(value)) => return Ok(Some(value)),
                Some(Frame::Empty) => return Ok(None),
                Some(Frame::Closed) => return Err(EvokError::ConnectionClosed),
                Some(Frame::Fail(reason)) => {
                    return Err(EvokError::InvalidResponse(reason.to_string()))
                }
                None => self.handle.wake.notified().await,
            }
        }
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        if !self.connected {
            return Err(EvokError::NotConnected);
        }
        self.record(Event::Sent(request.to_json()));
        Ok(())
    }

    async fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.record(Event::Closed);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Three-device snapshot as answered to `{"cmd": "all"}`
pub fn snapshot() -> Value {
    json!([
        {"dev": "relay", "circuit": "1_01", "value": 0, "mode": "simple", "alias": "al_pump"},
        {"dev": "relay", "circuit": "1_02", "value": 0, "mode": "simple", "alias": "al_hall_light"},
        {"dev": "di", "circuit": "1_01", "value": 1, "debounce": 50}
    ])
}
