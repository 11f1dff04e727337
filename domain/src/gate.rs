//! Gate flow: the per-visit state machine a visitor walks through before the
//! content link is revealed.
//!
//! ```text
//! Loading ──load──▶ Loaded ──get_link (return visit)──▶ Revealed
//!    │                 │
//!    └──unknown──▶ NotFound
//!
//! within Loaded:
//! Idle ──continue──▶ CountdownRunning ──tick×5──▶ CountdownComplete ──▶ Dispatched
//! ```
//!
//! A click on "Get Link" during the first pass navigates away to the ads URL.
//! Navigation wipes all in-memory state, so the only progress that survives
//! is the per-token flag in [`SessionStore`]. A visitor returning with the
//! browser's back button re-enters through [`GateFlow::load`], which restores
//! the click step from that flag.
//!
//! When each step is its own request, the countdown start time is kept in the
//! session too. [`GateFlow::resume_countdown`] derives the remaining seconds
//! from the wall clock, so "Get Link" is refused until the full countdown has
//! elapsed. "Get Link" clears that start time, and the return pass has to
//! press "Continue" and wait again.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::{CoreError, Link, SessionStore, Token};

/// Seconds on the countdown before "Get Link" is offered.
pub const COUNTDOWN_START: u32 = 5;

/// Session key holding the "has clicked through to ads" flag for a token.
pub fn clicked_flag_key(token: &Token) -> String {
    format!("linkgate_clicked_{}", token.as_str())
}

/// Session key holding the countdown start (unix millis) for a token.
pub fn countdown_key(token: &Token) -> String {
    format!("linkgate_countdown_{}", token.as_str())
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Read side of the link registry as seen by the gate.
pub trait LinkSource {
    fn get_link(&self, token: &Token) -> Result<Link, CoreError>;
    /// Fire-and-forget; must not fail the caller.
    fn increment_visitors(&self);
}

/// Why the flow is being loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// A visitor opening the gate page. Counts as a view.
    FirstView,
    /// A continuation of a visit already counted (countdown tick, "Get Link").
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Loaded,
    NotFound,
    Revealed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reveal {
    Idle,
    CountdownRunning { remaining: u32 },
    CountdownComplete,
    Dispatched,
}

/// Progress through the two-click gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickStep {
    /// Next "Get Link" goes to the ads URL.
    First,
    /// Visitor came back from the ad; next "Get Link" goes to the content.
    Return,
}

impl ClickStep {
    pub fn as_u8(self) -> u8 {
        match self {
            ClickStep::First => 0,
            ClickStep::Return => 1,
        }
    }
}

/// Where the browser should go next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    Ads(String),
    Content(String),
}

impl Navigation {
    pub fn url(&self) -> &str {
        match self {
            Navigation::Ads(u) | Navigation::Content(u) => u,
        }
    }
}

/// The content-preview buttons. Each is a shortcut straight to the ads URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewAction {
    WatchNow,
    Download,
    StreamHd,
    FastServer,
}

impl PreviewAction {
    pub const ALL: [PreviewAction; 4] = [
        PreviewAction::WatchNow,
        PreviewAction::Download,
        PreviewAction::StreamHd,
        PreviewAction::FastServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewAction::WatchNow => "watch",
            PreviewAction::Download => "download",
            PreviewAction::StreamHd => "stream-hd",
            PreviewAction::FastServer => "fast-server",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PreviewAction::WatchNow => "Watch Now",
            PreviewAction::Download => "Download",
            PreviewAction::StreamHd => "Stream HD",
            PreviewAction::FastServer => "Fast Server",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "watch" => Some(PreviewAction::WatchNow),
            "download" => Some(PreviewAction::Download),
            "stream-hd" => Some(PreviewAction::StreamHd),
            "fast-server" => Some(PreviewAction::FastServer),
            _ => None,
        }
    }
}

/// State machine for a single page visit.
#[derive(Clone, Debug)]
pub struct GateFlow {
    token: Token,
    phase: Phase,
    reveal: Reveal,
    click_step: ClickStep,
    link: Option<Link>,
}

impl GateFlow {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            phase: Phase::Loading,
            reveal: Reveal::Idle,
            click_step: ClickStep::First,
            link: None,
        }
    }

    /// Resolve the token and restore progress from the session.
    ///
    /// Unknown tokens move to the terminal `NotFound` phase and return `Ok`.
    /// Backend failures are returned and leave the flow in `Loading` so the
    /// load can be retried.
    pub fn load<L, S>(&mut self, source: &L, session: &S, entry: Entry) -> Result<Phase, CoreError>
    where
        L: LinkSource + ?Sized,
        S: SessionStore + ?Sized,
    {
        if self.phase != Phase::Loading {
            return Err(self.refuse("load"));
        }
        let link = match source.get_link(&self.token) {
            Ok(link) => link,
            Err(CoreError::NotFound) => {
                info!(token = %self.token, "gate token not found");
                self.phase = Phase::NotFound;
                return Ok(self.phase);
            }
            Err(e) => return Err(e),
        };
        if entry == Entry::FirstView {
            source.increment_visitors();
        }
        self.click_step = if session.get(&clicked_flag_key(&self.token)).is_some() {
            ClickStep::Return
        } else {
            ClickStep::First
        };
        self.link = Some(link);
        self.phase = Phase::Loaded;
        self.reveal = Reveal::Idle;
        debug!(token = %self.token, click_step = self.click_step.as_u8(), "gate loaded");
        Ok(self.phase)
    }

    /// "Continue": start the countdown.
    pub fn press_continue(&mut self) -> Result<u32, CoreError> {
        if self.phase != Phase::Loaded || self.reveal != Reveal::Idle {
            return Err(self.refuse("continue"));
        }
        self.reveal = Reveal::CountdownRunning {
            remaining: COUNTDOWN_START,
        };
        Ok(COUNTDOWN_START)
    }

    /// "Continue" pressed in a request-per-step setting: start the countdown
    /// and record its start time in the session.
    pub fn start_countdown<S>(&mut self, session: &mut S, now: SystemTime) -> Result<u32, CoreError>
    where
        S: SessionStore + ?Sized,
    {
        let remaining = self.press_continue()?;
        session.set(&countdown_key(&self.token), &unix_millis(now).to_string());
        debug!(token = %self.token, "countdown started");
        Ok(remaining)
    }

    /// Restore a countdown started by an earlier request, ticking once per
    /// whole second elapsed since the recorded start. No recorded start is an
    /// `InvalidTransition`: the visitor has not pressed "Continue" yet.
    pub fn resume_countdown<S>(&mut self, session: &S, now: SystemTime) -> Result<u32, CoreError>
    where
        S: SessionStore + ?Sized,
    {
        if self.phase != Phase::Loaded || self.reveal != Reveal::Idle {
            return Err(self.refuse("resume countdown"));
        }
        let started = session
            .get(&countdown_key(&self.token))
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| self.refuse("resume countdown without continue"))?;
        let elapsed = unix_millis(now).saturating_sub(started) / 1000;
        self.press_continue()?;
        for _ in 0..elapsed.min(u64::from(COUNTDOWN_START)) {
            self.tick()?;
        }
        Ok(self.remaining().unwrap_or(0))
    }

    /// One second elapsed on the countdown.
    pub fn tick(&mut self) -> Result<Reveal, CoreError> {
        let current = self.reveal;
        match current {
            Reveal::CountdownRunning { remaining } if self.phase == Phase::Loaded => {
                let remaining = remaining.saturating_sub(1);
                self.reveal = if remaining == 0 {
                    Reveal::CountdownComplete
                } else {
                    Reveal::CountdownRunning { remaining }
                };
                Ok(self.reveal)
            }
            _ => Err(self.refuse("tick")),
        }
    }

    /// "Get Link": first pass goes to the ads URL and remembers it in the
    /// session, the return pass clears the flag and reveals the content URL.
    pub fn get_link<S>(&mut self, session: &mut S) -> Result<Navigation, CoreError>
    where
        S: SessionStore + ?Sized,
    {
        if self.phase != Phase::Loaded || self.reveal != Reveal::CountdownComplete {
            return Err(self.refuse("get link"));
        }
        let (ads_url, content_url) = match self.link.as_ref() {
            Some(link) => (link.ads_url.clone(), link.content_url.clone()),
            None => return Err(CoreError::NotFound),
        };
        let key = clicked_flag_key(&self.token);
        session.remove(&countdown_key(&self.token));
        match self.click_step {
            ClickStep::First => {
                session.set(&key, "true");
                self.click_step = ClickStep::Return;
                info!(token = %self.token, "gate dispatching to ads");
                Ok(Navigation::Ads(ads_url))
            }
            ClickStep::Return => {
                session.remove(&key);
                let nav = Navigation::Content(content_url);
                self.phase = Phase::Revealed;
                self.reveal = Reveal::Dispatched;
                info!(token = %self.token, "gate revealed content");
                Ok(nav)
            }
        }
    }

    /// A preview button pressed before "Continue": straight to the ads URL,
    /// session untouched.
    pub fn shortcut(&self, action: PreviewAction) -> Result<Navigation, CoreError> {
        if self.phase != Phase::Loaded || self.reveal != Reveal::Idle {
            return Err(self.refuse(action.as_str()));
        }
        let link = self.link.as_ref().ok_or(CoreError::NotFound)?;
        debug!(token = %self.token, action = action.as_str(), "gate shortcut");
        Ok(Navigation::Ads(link.ads_url.clone()))
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reveal(&self) -> Reveal {
        self.reveal
    }

    pub fn click_step(&self) -> ClickStep {
        self.click_step
    }

    pub fn link(&self) -> Option<&Link> {
        self.link.as_ref()
    }

    /// Seconds left on the countdown; 0 once complete, `None` before it starts.
    pub fn remaining(&self) -> Option<u32> {
        match self.reveal {
            Reveal::CountdownRunning { remaining } => Some(remaining),
            Reveal::CountdownComplete | Reveal::Dispatched => Some(0),
            Reveal::Idle => None,
        }
    }

    fn refuse(&self, action: &str) -> CoreError {
        CoreError::InvalidTransition(format!(
            "{action} not allowed in {:?}/{:?}",
            self.phase, self.reveal
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_session::MemorySession;
    use std::cell::Cell;

    struct FakeSource {
        link: Option<Link>,
        fail: bool,
        increments: Cell<u32>,
    }

    impl FakeSource {
        fn with_link() -> Self {
            Self {
                link: Some(Link {
                    token: Token::new("T0k3n_-x").unwrap(),
                    content_url: "https://content.example/file".into(),
                    ads_url: "https://ads.example/landing".into(),
                    image_url: "https://blobs.example/images/a_b.png".into(),
                    created_at: SystemTime::UNIX_EPOCH,
                }),
                fail: false,
                increments: Cell::new(0),
            }
        }

        fn empty() -> Self {
            Self { link: None, fail: false, increments: Cell::new(0) }
        }

        fn broken() -> Self {
            Self { link: None, fail: true, increments: Cell::new(0) }
        }
    }

    impl LinkSource for FakeSource {
        fn get_link(&self, token: &Token) -> Result<Link, CoreError> {
            if self.fail {
                return Err(CoreError::Persistence("backend unavailable".into()));
            }
            self.link
                .clone()
                .filter(|l| &l.token == token)
                .ok_or(CoreError::NotFound)
        }

        fn increment_visitors(&self) {
            self.increments.set(self.increments.get() + 1);
        }
    }

    fn token() -> Token {
        Token::new("T0k3n_-x").unwrap()
    }

    fn run_countdown(flow: &mut GateFlow) {
        assert_eq!(flow.press_continue().unwrap(), COUNTDOWN_START);
        for _ in 0..COUNTDOWN_START - 1 {
            assert!(matches!(flow.tick().unwrap(), Reveal::CountdownRunning { .. }));
        }
        assert_eq!(flow.tick().unwrap(), Reveal::CountdownComplete);
    }

    #[test]
    fn full_two_click_traversal() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();

        // First visit: countdown, then Get Link goes to ads and sets the flag
        let mut flow = GateFlow::new(token());
        assert_eq!(flow.load(&source, &session, Entry::FirstView).unwrap(), Phase::Loaded);
        assert_eq!(flow.click_step(), ClickStep::First);
        run_countdown(&mut flow);
        let nav = flow.get_link(&mut session).unwrap();
        assert_eq!(nav, Navigation::Ads("https://ads.example/landing".into()));
        assert_eq!(session.get(&clicked_flag_key(&token())).as_deref(), Some("true"));

        // Back navigation reloads the page: fresh flow, restored click step
        let mut back = GateFlow::new(token());
        back.load(&source, &session, Entry::FirstView).unwrap();
        assert_eq!(back.click_step(), ClickStep::Return);
        run_countdown(&mut back);
        let nav = back.get_link(&mut session).unwrap();
        assert_eq!(nav, Navigation::Content("https://content.example/file".into()));
        assert_eq!(back.phase(), Phase::Revealed);
        assert_eq!(back.reveal(), Reveal::Dispatched);
        assert!(session.get(&clicked_flag_key(&token())).is_none());

        assert_eq!(source.increments.get(), 2);
    }

    #[test]
    fn restart_after_traversal_behaves_like_first_visit() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();
        session.set(&clicked_flag_key(&token()), "true");

        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        run_countdown(&mut flow);
        flow.get_link(&mut session).unwrap();

        let mut again = GateFlow::new(token());
        again.load(&source, &session, Entry::FirstView).unwrap();
        assert_eq!(again.click_step(), ClickStep::First);
        assert_eq!(again.reveal(), Reveal::Idle);
    }

    #[test]
    fn shortcut_goes_to_ads_without_touching_session() {
        let source = FakeSource::with_link();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();

        for action in PreviewAction::ALL {
            let nav = flow.shortcut(action).unwrap();
            assert_eq!(nav.url(), "https://ads.example/landing");
        }
        assert!(session.get(&clicked_flag_key(&token())).is_none());
        assert_eq!(flow.reveal(), Reveal::Idle);
    }

    #[test]
    fn shortcut_unavailable_after_continue() {
        let source = FakeSource::with_link();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        flow.press_continue().unwrap();
        assert!(matches!(
            flow.shortcut(PreviewAction::WatchNow),
            Err(CoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn get_link_requires_completed_countdown() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        assert!(flow.get_link(&mut session).is_err());
        flow.press_continue().unwrap();
        flow.tick().unwrap();
        assert_eq!(flow.remaining(), Some(COUNTDOWN_START - 1));
        assert!(flow.get_link(&mut session).is_err());
        assert!(session.get(&clicked_flag_key(&token())).is_none());
    }

    #[test]
    fn continue_only_once_and_tick_only_while_running() {
        let source = FakeSource::with_link();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        assert!(flow.press_continue().is_err());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        assert!(flow.tick().is_err());
        run_countdown(&mut flow);
        assert!(flow.press_continue().is_err());
        assert!(flow.tick().is_err());
        assert_eq!(flow.remaining(), Some(0));
    }

    #[test]
    fn unknown_token_is_terminal_not_found() {
        let source = FakeSource::empty();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        assert_eq!(flow.load(&source, &session, Entry::FirstView).unwrap(), Phase::NotFound);
        assert!(flow.link().is_none());
        assert!(flow.press_continue().is_err());
        assert!(flow.load(&source, &session, Entry::FirstView).is_err());
        assert_eq!(source.increments.get(), 0);
    }

    #[test]
    fn backend_failure_is_retryable_and_stays_loading() {
        let source = FakeSource::broken();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        let err = flow.load(&source, &session, Entry::FirstView).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(flow.phase(), Phase::Loading);

        let recovered = FakeSource::with_link();
        assert_eq!(flow.load(&recovered, &session, Entry::FirstView).unwrap(), Phase::Loaded);
    }

    #[test]
    fn resume_entry_does_not_count_a_visit() {
        let source = FakeSource::with_link();
        let session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::Resume).unwrap();
        assert_eq!(source.increments.get(), 0);
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn resumed_countdown_follows_wall_clock() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();

        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        assert_eq!(flow.start_countdown(&mut session, at(0)).unwrap(), COUNTDOWN_START);
        assert!(session.get(&countdown_key(&token())).is_some());

        for (elapsed, expected) in [(0, 5), (2, 3), (5, 0), (60, 0)] {
            let mut later = GateFlow::new(token());
            later.load(&source, &session, Entry::Resume).unwrap();
            assert_eq!(later.resume_countdown(&session, at(elapsed)).unwrap(), expected);
        }
        assert_eq!(source.increments.get(), 1);
    }

    #[test]
    fn get_link_refused_before_countdown_elapses() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::FirstView).unwrap();
        flow.start_countdown(&mut session, at(0)).unwrap();

        let mut early = GateFlow::new(token());
        early.load(&source, &session, Entry::Resume).unwrap();
        early.resume_countdown(&session, at(4)).unwrap();
        assert!(matches!(early.get_link(&mut session), Err(CoreError::InvalidTransition(_))));
        assert!(session.get(&clicked_flag_key(&token())).is_none());

        let mut done = GateFlow::new(token());
        done.load(&source, &session, Entry::Resume).unwrap();
        done.resume_countdown(&session, at(5)).unwrap();
        assert!(matches!(done.get_link(&mut session).unwrap(), Navigation::Ads(_)));
        // the return pass must press Continue again
        assert!(session.get(&countdown_key(&token())).is_none());
    }

    #[test]
    fn resume_without_continue_is_refused() {
        let source = FakeSource::with_link();
        let mut session = MemorySession::new();
        let mut flow = GateFlow::new(token());
        flow.load(&source, &session, Entry::Resume).unwrap();
        assert!(matches!(
            flow.resume_countdown(&session, at(60)),
            Err(CoreError::InvalidTransition(_))
        ));
        assert_eq!(flow.reveal(), Reveal::Idle);

        session.set(&countdown_key(&token()), "not-a-number");
        assert!(flow.resume_countdown(&session, at(60)).is_err());
    }

    #[test]
    fn preview_action_parse_roundtrip() {
        for action in PreviewAction::ALL {
            assert_eq!(PreviewAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(PreviewAction::parse("WATCH"), Some(PreviewAction::WatchNow));
        assert_eq!(PreviewAction::parse("nope"), None);
    }
}
