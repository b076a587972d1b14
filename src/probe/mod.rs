// src/probe/mod.rs - Z probe module: one owned instance wiring pin, poller, sequencer and router
pub mod input;
pub mod poller;
pub mod router;
pub mod sequencer;
pub mod session;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::motion::MotionSystem;
use crate::scheduler::SlowTicker;
use crate::strategies::load_strategy;

pub use input::{PinReader, PinSpec, ProbeInput};
pub use poller::{ContactPoller, DEFAULT_POLL_RATE_HZ};
pub use router::{CALIBRATION_SLOT, LEVELING_SLOT, ProbeCommandRouter};
pub use sequencer::{AxisProbe, ProbeOutcome, ProbeSequencer};
pub use session::{ArmedSession, ProbeSession, SessionState};

pub struct ZProbe {
    input: Arc<ProbeInput>,
    session: Arc<ProbeSession>,
    poller: Arc<ContactPoller>,
    sequencer: Arc<ProbeSequencer>,
    router: Arc<ProbeCommandRouter>,
}

impl ZProbe {
    /// Build the module from `config`. `Ok(None)` when the probe is disabled;
    /// an unconnected pin is an error. Strategy problems are logged and leave
    /// the slot empty.
    pub fn configure(
        config: &Config,
        motion: Arc<dyn MotionSystem>,
        pin: Arc<dyn PinReader>,
    ) -> Result<Option<Self>, ConfigError> {
        let settings = &config.zprobe;
        if !settings.enable {
            tracing::info!("Z probe disabled");
            return Ok(None);
        }
        settings.validate()?;

        let spec: PinSpec = settings.probe_pin.parse()?;
        if !spec.connected() {
            tracing::error!("config-zprobe: no pin defined");
            return Err(ConfigError::Invalid("config-zprobe: no pin defined".to_string()));
        }

        let input = Arc::new(ProbeInput::new(spec, pin));
        let session = Arc::new(ProbeSession::new());
        let poller = Arc::new(ContactPoller::new(
            input.clone(),
            session.clone(),
            motion.clone(),
            config.machine.poll_rate_hz,
        ));
        let debounce_ticks = poller.debounce_ticks(settings.debounce_ms);
        let sequencer = Arc::new(ProbeSequencer::new(
            input.clone(),
            session.clone(),
            motion,
            settings.tunables(),
            settings.reverse_z,
            debounce_ticks,
        ));

        let load = |selector: &Option<String>, slot: usize| {
            selector
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .and_then(|s| {
                    load_strategy(s, slot, &config.strategy_settings(s.trim()), &sequencer)
                })
        };
        let leveling = load(&settings.leveling, LEVELING_SLOT);
        let calibration = load(&settings.calibration, CALIBRATION_SLOT);
        let router = Arc::new(ProbeCommandRouter::new(sequencer.clone(), leveling, calibration));

        tracing::info!(
            "Z probe on {} (debounce {} ticks at {} Hz)",
            input.spec(),
            debounce_ticks,
            poller.rate_hz()
        );
        Ok(Some(Self {
            input,
            session,
            poller,
            sequencer,
            router,
        }))
    }

    pub fn register(&self, dispatcher: &mut Dispatcher) {
        self.router.register(dispatcher);
    }

    /// Start contact polling on `ticker`.
    pub fn start(&self, ticker: &SlowTicker) -> JoinHandle<()> {
        self.poller.attach(ticker)
    }

    pub fn input(&self) -> &Arc<ProbeInput> {
        &self.input
    }

    pub fn session(&self) -> &Arc<ProbeSession> {
        &self.session
    }

    pub fn poller(&self) -> &Arc<ContactPoller> {
        &self.poller
    }

    pub fn sequencer(&self) -> &Arc<ProbeSequencer> {
        &self.sequencer
    }

    pub fn router(&self) -> &Arc<ProbeCommandRouter> {
        &self.router
    }
}
