//! Server-held per-user view state for the movie page.
//!
//! Mutations are applied optimistically: the slot changes before the backend
//! call and is reverted when the call fails. Every page load bumps the slot's
//! generation, and a response that arrives for an older generation is
//! dropped instead of reverting or reconciling newer state.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    data::memberships::TrailerList,
    error::{AppError, AppResult},
    models::{Comment, Membership, Trailer},
};

/// Generation of a slot at the moment a mutation started.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ViewTicket(u64);

struct SlotState<T> {
    generation: u64,
    value: T,
}

pub struct ViewSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T: Clone> ViewSlot<T> {
    pub fn new(value: T) -> Self {
        Self { state: Mutex::new(SlotState { generation: 0, value }) }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the state with freshly loaded data, invalidating every ticket
    /// handed out before.
    pub fn load(&self, value: T) -> ViewTicket {
        let mut state = self.lock();
        state.generation += 1;
        state.value = value;
        ViewTicket(state.generation)
    }

    pub fn ticket(&self) -> ViewTicket {
        ViewTicket(self.lock().generation)
    }

    pub fn snapshot(&self) -> T {
        self.lock().value.clone()
    }

    /// Apply `f` only if no reload happened since `ticket` was taken.
    pub fn apply(&self, ticket: ViewTicket, f: impl FnOnce(&mut T)) -> bool {
        let mut state = self.lock();
        if state.generation != ticket.0 {
            return false;
        }
        f(&mut state.value);
        true
    }
}

#[derive(Debug)]
pub enum Outcome<T, R> {
    /// The call succeeded; `value` is the slot state after the mutation.
    Applied { value: T, result: R, ticket: ViewTicket },
    /// The call failed and the forward change was undone.
    Reverted { error: AppError, ticket: ViewTicket },
    /// The slot was reloaded while the call was in flight; its response was
    /// discarded.
    Stale,
}

/// Apply `forward` to the slot, run `call`, and undo with `inverse` if the
/// call fails. No lock is held while `call` runs.
pub async fn optimistic<T, R, Fut>(
    slot: &ViewSlot<T>,
    forward: impl FnOnce(&mut T),
    inverse: impl FnOnce(&mut T),
    call: Fut,
) -> Outcome<T, R>
where
    T: Clone,
    Fut: Future<Output = AppResult<R>>,
{
    let ticket = {
        let mut state = slot.lock();
        forward(&mut state.value);
        ViewTicket(state.generation)
    };

    let result = call.await;

    let mut state = slot.lock();
    if state.generation != ticket.0 {
        debug!(started = ticket.0, current = state.generation, "discarding stale response");
        return Outcome::Stale;
    }
    match result {
        Ok(result) => Outcome::Applied { value: state.value.clone(), result, ticket },
        Err(error) => {
            inverse(&mut state.value);
            Outcome::Reverted { error, ticket }
        },
    }
}

/// What a signed-in user currently sees on a movie page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovieView {
    pub trailer: Trailer,
    pub favorite: Membership,
    pub watchlist: Membership,
    pub comments: Vec<Comment>,
}

impl MovieView {
    pub fn comment_mut(&mut self, comment_id: &str) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == comment_id)
    }

    pub fn set_comment_content(&mut self, comment_id: &str, content: &str) {
        if let Some(comment) = self.comment_mut(comment_id) {
            comment.content = content.to_string();
        }
    }

    pub fn set_liked(&mut self, comment_id: &str, liked: bool) {
        if let Some(comment) = self.comment_mut(comment_id) {
            if comment.liked_by_viewer != liked {
                comment.liked_by_viewer = liked;
                comment.likes = if liked { comment.likes + 1 } else { comment.likes.saturating_sub(1) };
            }
        }
    }
}

fn toggled(state: Membership) -> Membership {
    Membership::from_present(!state.is_present())
}

impl MovieView {
    pub fn membership(&self, list: TrailerList) -> Membership {
        match list {
            TrailerList::Favorites => self.favorite,
            TrailerList::Watchlist => self.watchlist,
        }
    }

    pub fn set_membership(&mut self, list: TrailerList, state: Membership) {
        match list {
            TrailerList::Favorites => self.favorite = state,
            TrailerList::Watchlist => self.watchlist = state,
        }
    }

    pub fn flip(&mut self, list: TrailerList) {
        self.set_membership(list, toggled(self.membership(list)));
    }
}

type SlotKey = (String, String);

/// Open movie pages kept per user; the least recently used one is dropped
/// beyond this.
pub const MAX_SLOTS_PER_USER: usize = 16;
/// Slots untouched for this long are dropped.
pub const SLOT_IDLE: Duration = Duration::from_secs(30 * 60);

struct Entry {
    slot: Arc<ViewSlot<MovieView>>,
    touched: Instant,
    last_used: u64,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<SlotKey, Entry>,
    clock: u64,
}

impl Slots {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Movie-page slots keyed by (user, trailer), bounded per user and expired
/// when idle.
pub struct ViewRegistry {
    slots: Mutex<Slots>,
    max_per_user: usize,
    idle: Duration,
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::with_limits(MAX_SLOTS_PER_USER, SLOT_IDLE)
    }
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_per_user: usize, idle: Duration) -> Self {
        Self { slots: Mutex::new(Slots::default()), max_per_user: max_per_user.max(1), idle }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a freshly loaded page, bumping the slot's generation.
    pub fn load(&self, user_id: &str, view: MovieView) -> (Arc<ViewSlot<MovieView>>, ViewTicket) {
        let now = Instant::now();
        let key = (user_id.to_string(), view.trailer.id.clone());

        let mut slots = self.slots();
        let before = slots.entries.len();
        slots.entries.retain(|_, e| now.duration_since(e.touched) < self.idle);
        let expired = before - slots.entries.len();

        let last_used = slots.tick();
        let slot = slots
            .entries
            .entry(key)
            .and_modify(|e| {
                e.touched = now;
                e.last_used = last_used;
            })
            .or_insert_with(|| Entry { slot: Arc::new(ViewSlot::new(view.clone())), touched: now, last_used })
            .slot
            .clone();
        let evicted = self.evict_over_cap(&mut slots, user_id);
        drop(slots);

        if expired + evicted > 0 {
            debug!(user_id, expired, evicted, "dropped view slots");
        }
        let ticket = slot.load(view);
        (slot, ticket)
    }

    /// Drop the user's least recently used slots beyond the cap.
    fn evict_over_cap(&self, slots: &mut Slots, user_id: &str) -> usize {
        let mut owned: Vec<(u64, String)> = slots
            .entries
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|((_, trailer), e)| (e.last_used, trailer.clone()))
            .collect();
        if owned.len() <= self.max_per_user {
            return 0;
        }
        owned.sort_unstable();
        let excess = owned.len() - self.max_per_user;
        for (_, trailer) in owned.into_iter().take(excess) {
            slots.entries.remove(&(user_id.to_string(), trailer));
        }
        excess
    }

    /// The live slot for a page, or `None` when it was never loaded or has
    /// gone idle.
    pub fn get(&self, user_id: &str, trailer_id: &str) -> Option<Arc<ViewSlot<MovieView>>> {
        let now = Instant::now();
        let key = (user_id.to_string(), trailer_id.to_string());
        let mut slots = self.slots();

        let live = slots.entries.get(&key).map(|e| now.duration_since(e.touched) < self.idle)?;
        if !live {
            slots.entries.remove(&key);
            return None;
        }
        let last_used = slots.tick();
        let entry = slots.entries.get_mut(&key)?;
        entry.touched = now;
        entry.last_used = last_used;
        Some(entry.slot.clone())
    }

    /// Drop every slot of a user, e.g. on sign-out.
    pub fn forget(&self, user_id: &str) {
        self.slots().entries.retain(|(user, _), _| user != user_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots().entries.len()
    }
}
