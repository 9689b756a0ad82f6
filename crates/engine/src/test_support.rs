//! In-memory transport and fixtures shared by the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arlo_api::{ApiMethod, ApiRequest, RawResponse, Transport, TransportError};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

/// One scripted reaction to a request.
#[derive(Clone)]
pub(crate) enum Step {
    Respond(RawResponse),
    Error(TransportError),
    /// Hold the request open until the gate is notified, then respond.
    Gated(Arc<Notify>, RawResponse),
    Delayed(Duration, RawResponse),
}

impl Step {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Step::Respond(RawResponse::new(status, body.to_string()))
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Step::Respond(RawResponse::new(status, body))
    }

    pub(crate) fn gated(gate: &Arc<Notify>, status: u16, body: Value) -> Self {
        Step::Gated(gate.clone(), RawResponse::new(status, body.to_string()))
    }

    pub(crate) fn delayed(delay: Duration, status: u16, body: Value) -> Self {
        Step::Delayed(delay, RawResponse::new(status, body.to_string()))
    }
}

/// Routes requests to queued steps. The last step for a route repeats.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<Step>>>,
    calls: Mutex<Vec<ApiRequest>>,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn method_key(method: ApiMethod) -> &'static str {
    match method {
        ApiMethod::Get => "GET",
        ApiMethod::Post => "POST",
    }
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on_get(&self, path: &str, step: Step) {
        self.push("GET", path, step);
    }

    pub(crate) fn on_post(&self, path: &str, step: Step) {
        self.push("POST", path, step);
    }

    fn push(&self, method: &'static str, path: &str, step: Step) {
        let mut routes = self.routes.lock().expect("routes lock");
        routes.entry((method, path.to_string())).or_default().push_back(step);
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|request| request.path == path).count()
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &ApiRequest) -> Step {
        let mut routes = self.routes.lock().expect("routes lock");
        let key = (method_key(request.method), request.path.clone());
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Step::json(404, json!({"errors": [{"message": format!("no route for {}", request.path)}]})),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        let step = self.next_step(&request);
        self.calls.lock().expect("calls lock").push(request);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match step {
            Step::Respond(response) => Ok(response),
            Step::Error(error) => Err(error),
            Step::Gated(gate, response) => {
                gate.notified().await;
                Ok(response)
            }
            Step::Delayed(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }
}

pub(crate) fn status_doc(phase: &str) -> Value {
    json!({"electionId": "e1", "phase": phase, "randomSeed": null, "riskLimit": null})
}

pub(crate) fn rounds_doc(rounds: &[(u32, u32, u32)]) -> Value {
    let rounds: Vec<Value> = rounds
        .iter()
        .map(|(round_num, sampled, audited)| {
            json!({
                "id": format!("round-{round_num}"),
                "roundNum": round_num,
                "startedAt": "2026-03-01T12:00:00Z",
                "endedAt": null,
                "jurisdictions": {"j1": {"numBallotsSampled": sampled, "numBallotsAudited": audited}}
            })
        })
        .collect();
    json!({"rounds": rounds})
}

pub(crate) fn jurisdictions_doc(ids: &[&str]) -> Value {
    let jurisdictions: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "name": format!("Jurisdiction {id}"),
                "ballotManifest": {"processing": {"status": "PROCESSED"}},
                "currentRoundStatus": null
            })
        })
        .collect();
    json!({"jurisdictions": jurisdictions})
}

pub(crate) fn contests_doc(targeted: &[(&str, bool)]) -> Value {
    let contests: Vec<Value> = targeted
        .iter()
        .map(|(id, is_targeted)| {
            json!({
                "id": id,
                "name": format!("Contest {id}"),
                "isTargeted": is_targeted,
                "numWinners": 1,
                "votesAllowed": 1,
                "choices": [{"id": format!("{id}-a"), "name": "A", "numVotes": 10}]
            })
        })
        .collect();
    json!({"contests": contests})
}

/// Ballots as `(ballot id, batch id, position)` in server order.
pub(crate) fn ballots_doc(round_id: &str, ballots: &[(&str, &str, u32)]) -> Value {
    let ballots: Vec<Value> = ballots
        .iter()
        .map(|(id, batch, position)| {
            json!({
                "id": id,
                "batch": {"id": batch, "name": format!("Batch {batch}"), "tabulator": null},
                "position": position,
                "status": "NOT_AUDITED"
            })
        })
        .collect();
    json!({"roundId": round_id, "ballots": ballots})
}
