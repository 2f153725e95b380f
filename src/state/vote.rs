//! Skip-the-round votes embedded in the Session Record.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::session::VoteState;

/// Ballot a participant can cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    /// Skip the rest of the round.
    For,
    /// Keep playing.
    Against,
}

/// What happened to a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BallotStatus {
    /// Counted.
    Recorded,
    /// The voter already voted; the first ballot stands.
    AlreadyVoted,
    /// The voter was not standing when the vote opened.
    NotEligible,
}

/// Final decision of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    /// Votes for strictly exceeded the threshold.
    Passed,
    /// Anything else, including a tie.
    Failed,
}

/// Record one ballot. Re-votes and ballots from outside the frozen electorate
/// leave the vote untouched.
pub fn cast_ballot(vote: &mut VoteState, voter: Uuid, choice: VoteChoice) -> BallotStatus {
    if !vote.eligible_voter_ids.contains(&voter) {
        return BallotStatus::NotEligible;
    }
    if vote.votes_for.contains(&voter) || vote.votes_against.contains(&voter) {
        return BallotStatus::AlreadyVoted;
    }
    match choice {
        VoteChoice::For => vote.votes_for.insert(voter),
        VoteChoice::Against => vote.votes_against.insert(voter),
    };
    BallotStatus::Recorded
}

/// Decide the vote: passes iff votes for strictly exceed `pass_ratio` of the
/// eligible voter count frozen at open time.
pub fn tally(vote: &VoteState, pass_ratio: f64) -> VoteOutcome {
    let votes_for = vote.votes_for.len() as f64;
    if votes_for > f64::from(vote.eligible_voter_count) * pass_ratio {
        VoteOutcome::Passed
    } else {
        VoteOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::SystemTime};

    use super::*;

    fn vote_with(eligible: usize) -> (VoteState, Vec<Uuid>) {
        let ids: Vec<Uuid> = (0..eligible).map(|_| Uuid::new_v4()).collect();
        let vote = VoteState {
            id: Uuid::new_v4(),
            initiator_id: ids[0],
            round_index: 0,
            votes_for: BTreeSet::from([ids[0]]),
            votes_against: BTreeSet::new(),
            eligible_voter_ids: ids.iter().copied().collect(),
            eligible_voter_count: eligible as u32,
            deadline: SystemTime::UNIX_EPOCH,
        };
        (vote, ids)
    }

    #[test]
    fn five_voters_need_three_in_favour() {
        let (mut vote, ids) = vote_with(5);
        cast_ballot(&mut vote, ids[1], VoteChoice::For);
        assert_eq!(tally(&vote, 0.5), VoteOutcome::Failed);

        cast_ballot(&mut vote, ids[2], VoteChoice::For);
        assert_eq!(tally(&vote, 0.5), VoteOutcome::Passed);
    }

    #[test]
    fn exact_half_fails() {
        let (mut vote, ids) = vote_with(4);
        cast_ballot(&mut vote, ids[1], VoteChoice::For);
        cast_ballot(&mut vote, ids[2], VoteChoice::Against);
        assert_eq!(tally(&vote, 0.5), VoteOutcome::Failed);
    }

    #[test]
    fn re_votes_are_ignored() {
        let (mut vote, ids) = vote_with(3);
        assert_eq!(
            cast_ballot(&mut vote, ids[0], VoteChoice::Against),
            BallotStatus::AlreadyVoted
        );
        assert_eq!(
            cast_ballot(&mut vote, ids[1], VoteChoice::Against),
            BallotStatus::Recorded
        );
        assert_eq!(
            cast_ballot(&mut vote, ids[1], VoteChoice::For),
            BallotStatus::AlreadyVoted
        );
        assert!(!vote.votes_against.contains(&ids[0]));
        assert_eq!(vote.votes_for.len(), 1);
    }

    #[test]
    fn outsiders_cannot_vote() {
        let (mut vote, _) = vote_with(2);
        assert_eq!(
            cast_ballot(&mut vote, Uuid::new_v4(), VoteChoice::For),
            BallotStatus::NotEligible
        );
        assert_eq!(vote.votes_for.len(), 1);
    }

    #[test]
    fn ratio_is_configurable() {
        let (mut vote, ids) = vote_with(3);
        cast_ballot(&mut vote, ids[1], VoteChoice::For);
        assert_eq!(tally(&vote, 0.5), VoteOutcome::Passed);
        assert_eq!(tally(&vote, 2.0 / 3.0), VoteOutcome::Failed);
    }
}
