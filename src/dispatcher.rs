use crate::error::{HueError, Result};
use crate::inventory::LightGroup;
use crate::pairing::BridgeSession;
use crate::protocol::{first_error, HttpMethod};
use crate::transport::HttpTransport;
use crate::types::{DesiredState, Light, LightCommand, LightId, Palette};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Requests outstanding at once per dispatcher unless configured otherwise
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Assign palette colors to lights round-robin, most prominent first
///
/// Light `i` gets swatch `i % palette.len()`. An empty palette yields no
/// commands, leaving every light as it was.
pub fn plan_commands(palette: &Palette, lights: &[Light], transition_time: Option<u16>) -> Vec<LightCommand> {
    let swatches = palette.swatches();
    if swatches.is_empty() {
        return Vec::new();
    }

    lights
        .iter()
        .enumerate()
        .map(|(i, light)| LightCommand {
            light_id: light.id.clone(),
            desired_state: DesiredState::for_color(
                swatches[i % swatches.len()].color,
                light.light_type,
                transition_time,
            ),
        })
        .collect()
}

/// Commands submitted by one [`LightDispatcher::dispatch`] call
///
/// Dropping the cycle detaches the commands; they still run to completion.
#[must_use = "drop the cycle to fire and forget, or await finish()"]
pub struct DispatchCycle {
    handles: Vec<JoinHandle<Result<()>>>,
}

impl DispatchCycle {
    fn empty() -> Self {
        Self { handles: Vec::new() }
    }

    /// Number of commands submitted
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the cycle submitted nothing
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every acknowledgement
    ///
    /// Fails with [`HueError::PartialCommandFailure`] if any command failed.
    pub async fn finish(self) -> Result<()> {
        let total = self.handles.len();
        let failed = join_all(self.handles)
            .await
            .into_iter()
            .filter(|outcome| !matches!(outcome, Ok(Ok(()))))
            .count();

        if failed > 0 {
            Err(HueError::PartialCommandFailure { failed, total })
        } else {
            Ok(())
        }
    }
}

/// Removes a light from the in-flight set when the job ends
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<LightId>>>,
    light_id: LightId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.light_id);
    }
}

/// Sends light state commands to a bridge
///
/// Every command runs on its own task and queues for one of a fixed number
/// of request permits, so callers never block; nothing is retried.
/// Brightness jobs are deduplicated per light through an in-flight set owned
/// by the dispatcher.
pub struct LightDispatcher {
    transport: Arc<dyn HttpTransport>,
    in_flight: Arc<Mutex<HashSet<LightId>>>,
    permits: Arc<Semaphore>,
    transition_time: Option<u16>,
}

impl LightDispatcher {
    /// Create a dispatcher allowing [`DEFAULT_MAX_IN_FLIGHT`] requests at once
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            transition_time: None,
        }
    }

    /// Limit the number of requests outstanding at once (at least one)
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Fade duration attached to color commands, in multiples of 100ms
    pub fn with_transition_time(mut self, transition_time: Option<u16>) -> Self {
        self.transition_time = transition_time;
        self
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<LightId>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether a brightness job for `light_id` is outstanding
    pub fn is_in_flight(&self, light_id: &str) -> bool {
        self.in_flight().contains(light_id)
    }

    /// Paint `palette` onto the current members of `targets`
    pub fn dispatch(&self, palette: &Palette, targets: &LightGroup, session: &BridgeSession) -> DispatchCycle {
        let lights = targets.snapshot();
        let commands = plan_commands(palette, &lights, self.transition_time);
        if commands.is_empty() {
            tracing::debug!(
                "Nothing to dispatch ({} color(s), {} light(s))",
                palette.len(),
                lights.len()
            );
            return DispatchCycle::empty();
        }
        if let Err(e) = session.api_base() {
            tracing::warn!("Skipping dispatch to {}: {}", session.address, e);
            return DispatchCycle::empty();
        }

        tracing::info!("Dispatching {} color(s) to {} light(s)", palette.len(), commands.len());
        let handles = commands
            .into_iter()
            .filter_map(|command| self.submit(command, session))
            .collect();
        DispatchCycle { handles }
    }

    /// Send one command without deduplication
    pub fn submit(&self, command: LightCommand, session: &BridgeSession) -> Option<JoinHandle<Result<()>>> {
        let url = self.state_url(session, &command.light_id)?;
        let transport = self.transport.clone();
        let permits = self.permits.clone();
        Some(tokio::spawn(async move {
            send_queued(&permits, transport.as_ref(), &url, &command).await
        }))
    }

    /// Set a light's brightness unless a brightness job for it is outstanding
    ///
    /// Returns `None` when the job was suppressed.
    pub fn set_brightness(
        &self,
        light_id: &str,
        brightness: u8,
        session: &BridgeSession,
    ) -> Option<JoinHandle<Result<()>>> {
        let url = self.state_url(session, light_id)?;
        if !self.in_flight().insert(light_id.to_string()) {
            tracing::debug!("Brightness job for light {} already in flight", light_id);
            return None;
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            light_id: light_id.to_string(),
        };
        let command = LightCommand {
            light_id: light_id.to_string(),
            desired_state: DesiredState::brightness(brightness),
        };
        let transport = self.transport.clone();
        let permits = self.permits.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            send_queued(&permits, transport.as_ref(), &url, &command).await
        }))
    }

    fn state_url(&self, session: &BridgeSession, light_id: &str) -> Option<String> {
        match session.lights_url() {
            Ok(lights) => Some(format!("{}/{}/state", lights, light_id)),
            Err(e) => {
                tracing::warn!("Cannot address light {}: {}", light_id, e);
                None
            }
        }
    }
}

async fn put_state(transport: &dyn HttpTransport, url: &str, state: &DesiredState) -> Result<()> {
    let body = serde_json::to_value(state)?;
    let reply = transport.send_json(HttpMethod::Put, url, Some(body)).await?;
    match first_error(&reply) {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

async fn send_state(transport: &dyn HttpTransport, url: &str, command: &LightCommand) -> Result<()> {
    let result = put_state(transport, url, &command.desired_state).await;
    match &result {
        Ok(()) => tracing::debug!("Light {} updated", command.light_id),
        Err(e) => tracing::warn!("Command for light {} failed: {}", command.light_id, e),
    }
    result
}

async fn send_queued(
    permits: &Semaphore,
    transport: &dyn HttpTransport,
    url: &str,
    command: &LightCommand,
) -> Result<()> {
    // permits are never closed
    let _permit = permits
        .acquire()
        .await
        .map_err(|_| HueError::Protocol("dispatcher queue closed".to_string()))?;
    send_state(transport, url, command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use crate::types::{LightType, Rgb, Swatch};
    use serde_json::json;
    use std::time::Duration;

    const RED: Rgb = Rgb::new(255, 0, 0);
    const BLUE: Rgb = Rgb::new(0, 0, 255);

    fn session() -> BridgeSession {
        BridgeSession::authorized("10.0.0.2", "abc")
    }

    fn state_url(id: &str) -> String {
        format!("http://10.0.0.2/api/abc/lights/{}/state", id)
    }

    fn lights(n: usize) -> Vec<Light> {
        (1..=n)
            .map(|i| Light::new(i.to_string(), format!("Light {}", i), LightType::Color))
            .collect()
    }

    fn two_colors() -> Palette {
        Palette::from_swatches(vec![
            Swatch { color: RED, weight: 0.7 },
            Swatch { color: BLUE, weight: 0.3 },
        ])
    }

    fn ok_reply() -> serde_json::Value {
        json!([{"success": {"/lights/1/state/on": true}}])
    }

    #[test]
    fn round_robin_in_prominence_order() {
        let commands = plan_commands(&two_colors(), &lights(5), None);
        assert_eq!(commands.len(), 5);

        let red = DesiredState::for_color(RED, LightType::Color, None);
        let blue = DesiredState::for_color(BLUE, LightType::Color, None);
        for (i, command) in commands.iter().enumerate() {
            assert_eq!(command.light_id, (i + 1).to_string());
            let expected = if i % 2 == 0 { &red } else { &blue };
            assert_eq!(&command.desired_state, expected, "light index {}", i);
        }
    }

    #[test]
    fn empty_palette_plans_nothing() {
        assert!(plan_commands(&Palette::empty(), &lights(3), None).is_empty());
    }

    #[tokio::test]
    async fn empty_palette_sends_nothing() {
        let transport = FakeTransport::new();
        let dispatcher = LightDispatcher::new(transport.clone());
        let cycle = dispatcher.dispatch(&Palette::empty(), &LightGroup::with_lights(lights(4)), &session());

        assert!(cycle.is_empty());
        cycle.finish().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 0);
    }

    #[tokio::test]
    async fn dispatch_addresses_each_light() {
        let transport = FakeTransport::new();
        for id in ["1", "2", "3"] {
            transport.reply(HttpMethod::Put, &state_url(id), ok_reply());
        }
        let dispatcher = LightDispatcher::new(transport.clone()).with_transition_time(Some(4));

        let cycle = dispatcher.dispatch(&two_colors(), &LightGroup::with_lights(lights(3)), &session());
        assert_eq!(cycle.len(), 3);
        cycle.finish().await.unwrap();

        let mut urls: Vec<_> = transport.requests().into_iter().map(|r| r.url).collect();
        urls.sort();
        assert_eq!(urls, vec![state_url("1"), state_url("2"), state_url("3")]);
        let body = transport.requests()[0].body.clone().unwrap();
        assert_eq!(body["transitiontime"], 4);
    }

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let transport = FakeTransport::new();
        transport.reply(HttpMethod::Put, &state_url("1"), ok_reply());
        transport.fail(HttpMethod::Put, &state_url("2"));
        transport.reply(
            HttpMethod::Put,
            &state_url("3"),
            json!([{"error": {"type": 201, "address": "/lights/3/state/hue", "description": "device is set to off"}}]),
        );
        let dispatcher = LightDispatcher::new(transport.clone());

        let cycle = dispatcher.dispatch(&two_colors(), &LightGroup::with_lights(lights(3)), &session());
        let result = cycle.finish().await;

        assert!(matches!(
            result,
            Err(HueError::PartialCommandFailure { failed: 2, total: 3 })
        ));
        assert_eq!(transport.count(HttpMethod::Put), 3);
    }

    #[tokio::test]
    async fn unauthorized_session_dispatches_nothing() {
        let transport = FakeTransport::new();
        let dispatcher = LightDispatcher::new(transport.clone());
        let cycle = dispatcher.dispatch(
            &two_colors(),
            &LightGroup::with_lights(lights(2)),
            &BridgeSession::disconnected(),
        );
        assert!(cycle.is_empty());
        assert_eq!(transport.count(HttpMethod::Put), 0);
    }

    #[tokio::test]
    async fn brightness_jobs_are_deduplicated() {
        let transport = FakeTransport::new();
        let gate = transport.gate();
        transport.reply(HttpMethod::Put, &state_url("1"), ok_reply());
        let dispatcher = LightDispatcher::new(transport.clone());

        let first = dispatcher.set_brightness("1", 120, &session()).unwrap();
        assert!(dispatcher.is_in_flight("1"));
        assert!(dispatcher.set_brightness("1", 80, &session()).is_none());

        // other lights are independent
        transport.reply(HttpMethod::Put, &state_url("2"), ok_reply());
        let other = dispatcher.set_brightness("2", 80, &session()).unwrap();

        gate.add_permits(2);
        first.await.unwrap().unwrap();
        other.await.unwrap().unwrap();
        assert!(!dispatcher.is_in_flight("1"));

        gate.add_permits(1);
        let third = dispatcher.set_brightness("1", 40, &session()).unwrap();
        third.await.unwrap().unwrap();

        let bodies: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.url == state_url("1"))
            .filter_map(|r| r.body)
            .collect();
        assert_eq!(bodies, vec![json!({"on": true, "bri": 120}), json!({"on": true, "bri": 40})]);
    }

    #[tokio::test]
    async fn failed_brightness_job_releases_light() {
        let transport = FakeTransport::new();
        transport.fail(HttpMethod::Put, &state_url("1"));
        let dispatcher = LightDispatcher::new(transport);

        let job = dispatcher.set_brightness("1", 10, &session()).unwrap();
        assert!(job.await.unwrap().is_err());
        assert!(!dispatcher.is_in_flight("1"));
    }

    #[tokio::test]
    async fn new_dispatch_is_not_blocked_by_previous() {
        let transport = FakeTransport::new();
        let gate = transport.gate();
        for id in ["1", "2"] {
            transport.reply(HttpMethod::Put, &state_url(id), ok_reply());
        }
        let dispatcher = LightDispatcher::new(transport.clone());
        let group = LightGroup::with_lights(lights(2));

        let stale = dispatcher.dispatch(&two_colors(), &group, &session());
        let fresh = dispatcher.dispatch(&Palette::from_swatches(vec![Swatch { color: BLUE, weight: 1.0 }]), &group, &session());
        assert_eq!(stale.len(), 2);
        assert_eq!(fresh.len(), 2);

        gate.add_permits(4);
        stale.finish().await.unwrap();
        fresh.finish().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_queue_behind_the_limit() {
        let transport = FakeTransport::new();
        let gate = transport.gate();
        for i in 1..=12 {
            transport.reply(HttpMethod::Put, &state_url(&i.to_string()), ok_reply());
        }
        let dispatcher = LightDispatcher::new(transport.clone()).with_max_in_flight(3);
        let one_color = Palette::from_swatches(vec![Swatch { color: RED, weight: 1.0 }]);

        let cycle = dispatcher.dispatch(&one_color, &LightGroup::with_lights(lights(12)), &session());
        assert_eq!(cycle.len(), 12);

        // let every task run until it blocks
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.count(HttpMethod::Put), 3);

        gate.add_permits(12);
        cycle.finish().await.unwrap();
        assert_eq!(transport.count(HttpMethod::Put), 12);
    }
}
