//! Long-lived users chaining sessions over simulated time.

use crate::context::SimulationContext;
use crate::deterministic::{DeterministicRng, SimTime};
use crate::graph::GraphError;
use crate::ids::IdGenerator;
use crate::population::UserProfile;
use crate::session::{Session, SessionEvent, SessionEventKind};

/// Seconds in a 365-day year, the unit of attrition and growth rates.
pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Per-user Bernoulli churn probability after `elapsed_secs` since the
/// previous session start.
pub fn churn_probability(attrition_rate: f64, elapsed_secs: f64) -> f64 {
    (attrition_rate * elapsed_secs.max(0.0) / SECONDS_PER_YEAR).clamp(0.0, 1.0)
}

/// What a user does after a session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Continued { next_start: SimTime },
    Churned,
}

#[derive(Debug)]
pub struct User {
    profile: UserProfile,
    session: Option<Session>,
    rng: DeterministicRng,
    churned: bool,
    last_session_start: Option<SimTime>,
    sessions_started: u64,
}

impl User {
    pub fn new(profile: UserProfile, rng: DeterministicRng) -> Self {
        Self {
            profile,
            session: None,
            rng,
            churned: false,
            last_session_start: None,
            sessions_started: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.profile.user_id
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_churned(&self) -> bool {
        self.churned
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    /// Start time of the first session, back-dated so that the population is
    /// already mid-cycle at `sim_start`.
    ///
    /// Walks the inter-session gap process forward from two mean gaps before
    /// `sim_start` until the candidate lands within one mean gap of it.
    pub fn warm_up_start(&mut self, sim_start: SimTime, session_gap: f64) -> SimTime {
        let beta = self.profile.beta;
        let threshold = sim_start.sub_secs(beta);
        let mut candidate = sim_start.sub_secs(2.0 * beta);
        loop {
            candidate = self.next_session_start(candidate, session_gap);
            if candidate > threshold {
                return candidate;
            }
        }
    }

    /// Opens the first session with warm-up seeding and returns its start.
    ///
    /// # Errors
    ///
    /// - `GraphError::NoStatesForBucket` - The user's auth and level have no entry states
    pub fn start_first_session(
        &mut self,
        ctx: &SimulationContext,
        ids: &IdGenerator,
    ) -> Result<SimTime, GraphError> {
        let start = self.warm_up_start(ctx.start(), ctx.simulation().session_gap);
        self.begin_session(start, ctx, ids)?;
        Ok(start)
    }

    /// Opens a session at exactly `at`, as for a user arriving mid-run.
    ///
    /// # Errors
    ///
    /// - `GraphError::NoStatesForBucket` - The user's auth and level have no entry states
    pub fn begin_session(&mut self, at: SimTime, ctx: &SimulationContext, ids: &IdGenerator) -> Result<(), GraphError> {
        let session = Session::new(ids.next_id(), at, ctx, &self.profile, self.rng.fork())?;
        self.session = Some(session);
        self.last_session_start = Some(at);
        self.sessions_started += 1;
        Ok(())
    }

    /// `from` plus an exponential gap of mean beta, never shorter than `session_gap`.
    pub fn next_session_start(&mut self, from: SimTime, session_gap: f64) -> SimTime {
        let gap = self.rng.exponential(self.profile.beta).max(session_gap);
        from.add_secs(gap)
    }

    /// Time of the next event of the current session, if it has one.
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.session
            .as_ref()
            .filter(|session| !session.is_done())
            .map(Session::next_event_time)
    }

    pub fn session_is_done(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_done)
    }

    /// Emits the next event of the current session.
    pub fn advance(&mut self, ctx: &SimulationContext) -> Option<SessionEvent> {
        let session = self.session.as_mut()?;
        let event = session.advance(ctx, &mut self.profile)?;

        if let SessionEventKind::Watch { video } = &event.kind {
            self.adjust_genre_preferences(&video.genres, ctx.genre_increment());
        }
        Some(event)
    }

    /// Adds `increment` to every genre in `genres`.
    pub fn adjust_genre_preferences(&mut self, genres: &[String], increment: u64) {
        for genre in genres {
            let weight = self.profile.genre_preferences.entry(genre.clone()).or_insert(0);
            *weight = weight.saturating_add(increment);
        }
    }

    /// Decides between churn and a new session after the current one ends at
    /// `now`.
    ///
    /// # Errors
    ///
    /// - `GraphError::NoStatesForBucket` - The next session has no entry states
    pub fn on_session_finished(
        &mut self,
        now: SimTime,
        ctx: &SimulationContext,
        ids: &IdGenerator,
    ) -> Result<SessionOutcome, GraphError> {
        if let Some(session) = self.session.take() {
            let last = ctx.graph().state(session.current_state());
            if last.level != self.profile.level && ctx.graph().has_bucket(&self.profile.auth, &last.level) {
                tracing::debug!(
                    user_id = self.id(),
                    from = %self.profile.level,
                    to = %last.level,
                    "User level changed"
                );
                self.profile.level = last.level.clone();
            }
        }

        let elapsed = self
            .last_session_start
            .map_or(0.0, |start| now.secs_since(start));
        let probability = churn_probability(ctx.simulation().attrition_rate, elapsed);
        if self.rng.random_f64() < probability {
            self.churned = true;
            tracing::debug!(user_id = self.id(), at = %now, "User churned");
            return Ok(SessionOutcome::Churned);
        }

        let next_start = self.next_session_start(now, ctx.simulation().session_gap);
        self.begin_session(next_start, ctx, ids)?;
        Ok(SessionOutcome::Continued { next_start })
    }
}
