use crate::domain::actor::Actor;
use crate::domain::item::ApprovalItem;
use crate::ladder::RoleLadder;

/// Whether `actor` may decide `item` at its current level.
///
/// True iff the item is open and the actor's ladder level equals the item's
/// current level exactly; an actor one rung above or below the required
/// approver may not act. Returns `false` rather than an error so the read
/// side can use it for "assigned to me" filtering; mutating operations
/// translate a `false` into `WorkflowError::Unauthorized`.
pub fn can_act(ladder: &RoleLadder, item: &ApprovalItem, actor: &Actor) -> bool {
    item.status.is_open() && ladder.level(&actor.role) == Some(item.current_level)
}
