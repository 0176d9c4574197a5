//! Order status transition rules.
//!
//! The forward sequence gives a generic backward/skip check with uniform
//! messages, and the transition table stays the single source of truth for
//! which forward moves exist. Every table entry satisfies the ordinal rule
//! or targets `Cancelled`.

use thiserror::Error;

use super::{OrderError, OrderStatus};

/// Reason a status transition was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    /// One or both statuses were not supplied.
    #[error("both 'from' and 'to' statuses are required")]
    Missing,

    /// A status string is not one of the six known values.
    #[error(
        "invalid status value '{0}', expected one of PENDING, CONFIRMED, PROCESSING, SHIPPED, DELIVERED, CANCELLED"
    )]
    UnknownStatus(String),

    #[error("cannot transition to same status {0}")]
    SameStatus(OrderStatus),

    #[error("cannot transition from terminal state {0}")]
    FromTerminal(OrderStatus),

    #[error("cannot cancel an order that has already shipped: goods are in transit")]
    ShippedNotCancellable,

    #[error("cannot move backward from {from} to {to}")]
    Backward { from: OrderStatus, to: OrderStatus },

    #[error("cannot skip states: {from} must move to {required} before {to}")]
    Skip {
        from: OrderStatus,
        to: OrderStatus,
        required: OrderStatus,
    },

    #[error("transition from {from} to {to} is not allowed")]
    NotAllowed { from: OrderStatus, to: OrderStatus },
}

/// Stateless validator of order status transitions.
///
/// Holds no data; every method is an associated function so callers can use
/// it without constructing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Checks whether moving from `from` to `to` is legal.
    ///
    /// Checks run in a fixed order and the first failure is reported.
    pub fn validate_transition(
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<(), TransitionRejection> {
        if from == to {
            return Err(TransitionRejection::SameStatus(from));
        }

        if from.is_terminal() {
            return Err(TransitionRejection::FromTerminal(from));
        }

        if from == OrderStatus::Shipped && to == OrderStatus::Cancelled {
            return Err(TransitionRejection::ShippedNotCancellable);
        }

        if to != OrderStatus::Cancelled
            && let (Some(from_ordinal), Some(to_ordinal)) = (from.ordinal(), to.ordinal())
        {
            if to_ordinal < from_ordinal {
                return Err(TransitionRejection::Backward { from, to });
            }
            if to_ordinal > from_ordinal + 1 {
                let required = Self::next_state(from).unwrap_or(to);
                return Err(TransitionRejection::Skip { from, to, required });
            }
        }

        if !Self::valid_transitions(from).contains(&to) {
            return Err(TransitionRejection::NotAllowed { from, to });
        }

        Ok(())
    }

    /// Validates a transition given as untyped status names.
    ///
    /// Missing values and unknown names are rejected before the typed check
    /// runs. Returns the parsed statuses on success.
    pub fn validate_raw_transition(
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<(OrderStatus, OrderStatus), TransitionRejection> {
        let (Some(from), Some(to)) = (from, to) else {
            return Err(TransitionRejection::Missing);
        };
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(TransitionRejection::Missing);
        }

        let from_status: OrderStatus = from
            .parse()
            .map_err(|_| TransitionRejection::UnknownStatus(from.to_string()))?;
        let to_status: OrderStatus = to
            .parse()
            .map_err(|_| TransitionRejection::UnknownStatus(to.to_string()))?;

        Self::validate_transition(from_status, to_status)?;
        Ok((from_status, to_status))
    }

    /// Like [`validate_transition`](Self::validate_transition), but returns a
    /// domain error naming both statuses.
    pub fn assert_valid_transition(from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
        Self::validate_transition(from, to).map_err(|rejection| OrderError::InvalidTransition {
            from,
            to,
            reason: rejection.to_string(),
        })
    }

    /// Returns true if no transition out of `status` exists.
    pub fn is_terminal_state(status: OrderStatus) -> bool {
        status.is_terminal()
    }

    /// Returns true for `Pending`, `Confirmed` and `Processing`.
    pub fn is_cancellable(status: OrderStatus) -> bool {
        status.is_cancellable()
    }

    /// Legal targets from `from`.
    pub fn valid_transitions(from: OrderStatus) -> &'static [OrderStatus] {
        match from {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Processing, OrderStatus::Cancelled],
            OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    /// The next status in the forward sequence, ignoring cancellation.
    pub fn next_state(status: OrderStatus) -> Option<OrderStatus> {
        let ordinal = status.ordinal()?;
        Self::by_ordinal(ordinal.checked_add(1)?)
    }

    /// The previous status in the forward sequence, ignoring cancellation.
    pub fn previous_state(status: OrderStatus) -> Option<OrderStatus> {
        let ordinal = status.ordinal()?;
        Self::by_ordinal(ordinal.checked_sub(1)?)
    }

    pub fn all_statuses() -> &'static [OrderStatus] {
        &OrderStatus::ALL
    }

    fn by_ordinal(ordinal: u8) -> Option<OrderStatus> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.ordinal() == Some(ordinal))
    }
}
