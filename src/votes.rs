use crate::error::AppError;

/// State of a single (post, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    NoVote,
    Voted,
}

impl VoteState {
    pub fn from_exists(exists: bool) -> Self {
        if exists { VoteState::Voted } else { VoteState::NoVote }
    }
}

/// The write a valid request performs on the vote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Insert,
    Delete,
}

/// Successful outcome of a vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Added,
    Removed,
}

impl VoteOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            VoteOutcome::Added => "vote added successfully",
            VoteOutcome::Removed => "vote removed successfully",
        }
    }
}

impl From<VoteAction> for VoteOutcome {
    fn from(action: VoteAction) -> Self {
        match action {
            VoteAction::Insert => VoteOutcome::Added,
            VoteAction::Delete => VoteOutcome::Removed,
        }
    }
}

pub const VOTE_CONFLICT: &str = "Voting conflict";

/// reconcile
///
/// Transition function of the vote state machine:
///
/// | current | dir   | result            |
/// |---------|-------|-------------------|
/// | NoVote  | true  | Insert            |
/// | Voted   | false | Delete            |
/// | NoVote  | false | Conflict          |
/// | Voted   | true  | Conflict          |
///
/// The caller must hold the pair inside one transaction between reading `current`
/// and performing the returned action; the (post_id, user_id) primary key catches
/// whatever slips past.
pub fn reconcile(current: VoteState, dir: bool) -> Result<VoteAction, AppError> {
    match (current, dir) {
        (VoteState::NoVote, true) => Ok(VoteAction::Insert),
        (VoteState::Voted, false) => Ok(VoteAction::Delete),
        _ => Err(AppError::conflict(VOTE_CONFLICT)),
    }
}
