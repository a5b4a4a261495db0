//! Algorithms that move resources within and between handlers.
//!
//! Every function taking `transaction: Option<&TransactionContext>` works
//! inside a child of the given transaction, or inside its own root
//! transaction when `None` is passed. With `None` the call is a one-shot,
//! all-or-nothing operation; with a transaction its effects are kept only if
//! the caller commits.
//!
//! Moves never take more out of the source than the target accepted: each
//! index is first probed in a discarded child transaction, then the accepted
//! amount is inserted and extracted together in a second child that is only
//! committed if both sides agree.

use std::any::type_name;

use crate::error::{MoveContext, TransferError};
use crate::handler::ResourceHandler;
use crate::resource::{Resource, ResourceStack, check_non_empty};
use crate::transaction::{Transaction, TransactionContext};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// `true` if no index holds a positive amount. A handler of size 0 is empty.
pub fn is_empty<R, H>(handler: &H) -> Result<bool, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    for index in 0..handler.size() {
        if handler.amount(index)? > 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `true` if every index holds at least its capacity for what it stores.
/// A handler of size 0 is full.
pub fn is_full<R, H>(handler: &H) -> Result<bool, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    for index in 0..handler.size() {
        let resource = handler.resource(index)?;
        if handler.amount(index)? < handler.capacity(index, &resource)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `true` if at least one index accepts `resource`.
pub fn is_valid_anywhere<R, H>(handler: &H, resource: &R) -> Result<bool, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    check_non_empty(resource)?;
    for index in 0..handler.size() {
        if handler.is_valid(index, resource)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The first index whose resource equals `resource`, even if its amount is 0.
pub fn index_of<R, H>(handler: &H, resource: &R) -> Result<Option<usize>, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    check_non_empty(resource)?;
    for index in 0..handler.size() {
        if handler.resource(index)? == *resource {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

pub fn contains<R, H>(handler: &H, resource: &R) -> Result<bool, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    Ok(index_of::<R, H>(handler, resource)?.is_some())
}

/// Map the average fill level onto `0..=max_signal`.
///
/// Only indices holding something with a positive capacity are averaged, and
/// an over-filled index counts as exactly full. Returns 0 when nothing is
/// stored, otherwise at least 1.
pub fn fill_signal<R, H>(handler: &H, max_signal: u32) -> Result<u32, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    let mut proportion = 0.0f64;
    let mut samples = 0u32;
    for index in 0..handler.size() {
        let amount = handler.amount(index)?;
        if amount == 0 {
            continue;
        }
        let capacity = handler.capacity(index, &handler.resource(index)?)?;
        if capacity > 0 {
            proportion += (amount as f64 / capacity as f64).min(1.0);
            samples += 1;
        }
    }

    if samples == 0 || max_signal == 0 {
        return Ok(0);
    }
    proportion /= f64::from(samples);
    let steps = f64::from(max_signal - 1);
    Ok(1 + (proportion * steps).floor() as u32)
}

/// The first resource matching `filter` that can actually be extracted.
///
/// Extraction is tried in a probe transaction that is always discarded.
pub fn find_extractable<R, H, F>(
    handler: &H,
    filter: F,
    transaction: Option<&TransactionContext>,
) -> Result<Option<R>, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    let probe = Transaction::open(transaction)?;
    for index in 0..handler.size() {
        let resource = handler.resource(index)?;
        if resource.is_empty() || !filter(&resource) {
            continue;
        }
        let amount = handler.amount(index)?;
        if handler.extract_at(index, &resource, amount, &probe)? > 0 {
            return Ok(Some(resource));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Single-handler operations
// ---------------------------------------------------------------------------

/// Insert into indices already holding something first, then into empty ones.
pub fn insert_stacking<R, H>(
    handler: &H,
    resource: &R,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<u64, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
{
    check_non_empty(resource)?;
    if amount == 0 {
        return Ok(0);
    }

    let tx = Transaction::open(transaction)?;
    let size = handler.size();
    let mut inserted = 0;

    for stacking in [true, false] {
        for index in 0..size {
            if inserted == amount {
                break;
            }
            if handler.resource(index)?.is_empty() != stacking {
                let remaining = amount - inserted;
                let moved = handler.insert_at(index, resource, remaining, &tx)?;
                inserted += moved.min(remaining);
            }
        }
    }

    tx.commit()?;
    Ok(inserted)
}

/// Extract up to `amount` of the first extractable resource matching `filter`.
///
/// Returns `None` if nothing matching could be extracted.
pub fn extract_first<R, H, F>(
    handler: &H,
    filter: F,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<Option<ResourceStack<R>>, TransferError>
where
    R: Resource,
    H: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    if amount == 0 {
        return Ok(None);
    }
    let Some(resource) = find_extractable::<R, H, F>(handler, filter, transaction)? else {
        return Ok(None);
    };

    let tx = Transaction::open(transaction)?;
    let extracted = handler.extract(&resource, amount, &tx)?;
    if extracted == 0 {
        return Ok(None);
    }
    tx.commit()?;
    Ok(Some(ResourceStack::new(resource, extracted)))
}

// ---------------------------------------------------------------------------
// Moves between handlers
// ---------------------------------------------------------------------------

/// Move up to `amount` of anything matching `filter` from `from` to `to`.
///
/// Walks the source indices in order and returns the total moved. Failures
/// raised by either handler are wrapped in [`TransferError::Move`]; nothing
/// is moved in that case.
pub fn move_resources<R, S, T, F>(
    from: &S,
    to: &T,
    filter: F,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<u64, TransferError>
where
    R: Resource,
    S: ResourceHandler<R> + ?Sized,
    T: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    if amount == 0 {
        return Ok(0);
    }
    move_all::<R, S, T, F>(from, to, &filter, amount, transaction).map_err(|source| {
        let filter = type_name::<F>();
        move_failure::<R, S, T>("move_resources", from, to, filter, amount, transaction, source)
    })
}

fn move_all<R, S, T, F>(
    from: &S,
    to: &T,
    filter: &F,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<u64, TransferError>
where
    R: Resource,
    S: ResourceHandler<R> + ?Sized,
    T: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    let outer = Transaction::open(transaction)?;
    let mut moved = 0;

    for index in 0..from.size() {
        let resource = from.resource(index)?;
        if resource.is_empty() || !filter(&resource) {
            continue;
        }

        let extractable = {
            let simulated = outer.open_nested()?;
            from.extract_at(index, &resource, amount - moved, &simulated)?
        };
        if extractable == 0 {
            continue;
        }

        let transfer = outer.open_nested()?;
        let inserted = to.insert(&resource, extractable, &transfer)?;
        // A source that only yields exactly what was simulated may refuse a
        // smaller amount; drop the transfer in that case.
        if from.extract_at(index, &resource, inserted, &transfer)? != inserted {
            continue;
        }
        moved += inserted;
        transfer.commit()?;

        if moved >= amount {
            break;
        }
    }

    outer.commit()?;
    Ok(moved)
}

/// Move up to `amount` of the first resource matching `filter` that the
/// target accepts, then keep moving only that same resource.
///
/// Each index is transferred in its own child of `transaction`, so with
/// `None` every index's transfer is committed as soon as it succeeds.
pub fn move_first<R, S, T, F>(
    from: &S,
    to: &T,
    filter: F,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<Option<ResourceStack<R>>, TransferError>
where
    R: Resource,
    S: ResourceHandler<R> + ?Sized,
    T: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    if amount == 0 {
        return Ok(None);
    }
    move_selected::<R, S, T, F>(from, to, &filter, amount, transaction).map_err(|source| {
        let filter = type_name::<F>();
        move_failure::<R, S, T>("move_first", from, to, filter, amount, transaction, source)
    })
}

fn move_selected<R, S, T, F>(
    from: &S,
    to: &T,
    filter: &F,
    amount: u64,
    transaction: Option<&TransactionContext>,
) -> Result<Option<ResourceStack<R>>, TransferError>
where
    R: Resource,
    S: ResourceHandler<R> + ?Sized,
    T: ResourceHandler<R> + ?Sized,
    F: Fn(&R) -> bool,
{
    let mut moved = 0;
    let mut selected: Option<R> = None;

    for index in 0..from.size() {
        let resource = from.resource(index)?;
        let eligible = match &selected {
            None => !resource.is_empty() && filter(&resource),
            Some(selected) => *selected == resource,
        };
        if !eligible {
            continue;
        }

        let extractable = {
            let simulated = Transaction::open(transaction)?;
            from.extract_at(index, &resource, amount - moved, &simulated)?
        };
        if extractable == 0 {
            continue;
        }

        let transfer = Transaction::open(transaction)?;
        let inserted = to.insert(&resource, extractable, &transfer)?;
        if inserted == 0 {
            continue;
        }
        if from.extract_at(index, &resource, inserted, &transfer)? != inserted {
            continue;
        }
        moved += inserted;
        transfer.commit()?;
        selected = Some(resource);

        if moved >= amount {
            break;
        }
    }

    Ok(selected
        .filter(|_| moved > 0)
        .map(|resource| ResourceStack::new(resource, moved)))
}

fn move_failure<R, S, T>(
    operation: &'static str,
    from: &S,
    to: &T,
    filter: &'static str,
    amount: u64,
    transaction: Option<&TransactionContext>,
    source: TransferError,
) -> TransferError
where
    R: Resource,
    S: ResourceHandler<R> + ?Sized,
    T: ResourceHandler<R> + ?Sized,
{
    let context = MoveContext {
        operation,
        from: from.describe(),
        to: to.describe(),
        filter,
        amount,
        transaction: transaction.map(ToString::to_string),
    };
    tracing::debug!(%context, error = %source, "resource move failed");
    TransferError::Move {
        context: Box::new(context),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::basic::EmptyHandler;
    use crate::combined::CombinedHandler;
    use crate::test_utils::*;

    fn any(_: &TestResource) -> bool {
        true
    }

    // -- queries ------------------------------------------------------------

    #[test]
    fn empty_checks() {
        assert!(is_empty::<TestResource, _>(&EmptyHandler).unwrap());
        assert!(is_empty(&MockHandler::new(1)).unwrap());
        let one = handler_for_stacks(&[EMPTY_STACK, stack(TestResource::Some, 1), EMPTY_STACK]);
        assert!(!is_empty(&one).unwrap());
        assert!(is_empty(&handler_for_stacks(&[stack(TestResource::Some, 0)])).unwrap());
    }

    #[test]
    fn full_checks() {
        assert!(is_full::<TestResource, _>(&EmptyHandler).unwrap());
        assert!(!is_full(&MockHandler::new(1)).unwrap());
        assert!(!is_full(&handler(&[
            capped_slot(TestResource::Some, u64::MAX, u64::MAX),
            capped_slot(TestResource::Some, u64::MAX - 1, u64::MAX),
        ]))
        .unwrap());
        assert!(is_full(&handler(&[
            capped_slot(TestResource::Some, u64::MAX, u64::MAX),
            capped_slot(TestResource::Some, u64::MAX, u64::MAX),
        ]))
        .unwrap());
        assert!(!is_full(&handler(&[capped_slot(TestResource::Some, 2, 1), EMPTY_SLOT])).unwrap());
    }

    #[test]
    fn validity_anywhere() {
        assert!(!is_valid_anywhere(&EmptyHandler, &TestResource::Some).unwrap());

        let single = MockHandler::new(1);
        single.set_valid(0, &[]);
        assert!(!is_valid_anywhere(&single, &TestResource::Some).unwrap());

        let mixed = MockHandler::new(3);
        mixed.set_valid(0, &[]);
        mixed.set_valid(1, &[TestResource::Some]);
        mixed.set_valid(2, &[]);
        assert!(is_valid_anywhere(&mixed, &TestResource::Some).unwrap());
    }

    #[test]
    fn index_and_contains() {
        let mock = handler_for_stacks(&[
            EMPTY_STACK,
            stack(TestResource::Some, 5),
            stack(TestResource::Other1, 10),
        ]);
        assert_eq!(index_of(&mock, &TestResource::Some).unwrap(), Some(1));
        assert_eq!(index_of(&mock, &TestResource::Other1).unwrap(), Some(2));
        assert_eq!(index_of(&mock, &TestResource::Other2).unwrap(), None);
        assert!(contains(&mock, &TestResource::Other1).unwrap());
        assert!(!contains(&MockHandler::new(1), &TestResource::Some).unwrap());
        let zero = handler_for_stacks(&[stack(TestResource::Some, 0)]);
        assert!(contains(&zero, &TestResource::Some).unwrap());
        assert!(matches!(
            index_of(&mock, &TestResource::Empty),
            Err(TransferError::EmptyResource)
        ));
    }

    fn expected_signal(levels: &[f64], max: u32) -> u32 {
        let average = levels.iter().map(|l| l.min(1.0)).sum::<f64>() / levels.len() as f64;
        1 + (average * f64::from(max - 1)).floor() as u32
    }

    #[test]
    fn fill_signal_levels() {
        assert_eq!(fill_signal::<TestResource, _>(&EmptyHandler, 15).unwrap(), 0);
        assert_eq!(fill_signal(&MockHandler::new(2), 15).unwrap(), 0);

        let mixed = handler(&[
            capped_slot(TestResource::Some, u64::MAX, u64::MAX),
            capped_slot(TestResource::Some, 1, 2),
        ]);
        assert_eq!(fill_signal(&mixed, 15).unwrap(), expected_signal(&[1.0, 0.5], 15));

        let overfilled = handler(&[
            capped_slot(TestResource::Some, 8, 4),
            capped_slot(TestResource::Some, 1, 2),
        ]);
        assert_eq!(fill_signal(&overfilled, 15).unwrap(), expected_signal(&[1.0, 0.5], 15));

        let zero_capacity = handler(&[
            capped_slot(TestResource::Some, 4, 4),
            capped_slot(TestResource::Some, 3, 0),
            capped_slot(TestResource::Some, 2, 2),
        ]);
        assert_eq!(fill_signal(&zero_capacity, 15).unwrap(), 15);
    }

    #[test]
    fn fill_signal_small_amounts_still_register() {
        let mock = handler(&[capped_slot(TestResource::Some, 1, 1_000)]);
        assert_eq!(fill_signal(&mock, 15).unwrap(), 1);
    }

    // -- insert_stacking ----------------------------------------------------

    #[test]
    fn insert_stacking_zero_amount() {
        assert_eq!(insert_stacking(&MockHandler::new(1), &TestResource::Some, 0, None).unwrap(), 0);
    }

    #[test]
    fn insert_stacking_into_empty_handler() {
        let mock = handler(&[EMPTY_SLOT, EMPTY_SLOT, EMPTY_SLOT]);
        assert_eq!(insert_stacking(&mock, &TestResource::Some, 10, None).unwrap(), 10);
        assert_eq!(
            describe_stacks(&mock),
            vec![stack(TestResource::Some, 10), EMPTY_STACK, EMPTY_STACK]
        );
    }

    #[test]
    fn insert_stacking_prefers_existing_piles() {
        let mock = handler_for_stacks(&[EMPTY_STACK, stack(TestResource::Some, 5), EMPTY_STACK]);
        assert_eq!(insert_stacking(&mock, &TestResource::Some, 10, None).unwrap(), 10);
        assert_eq!(
            describe_stacks(&mock),
            vec![EMPTY_STACK, stack(TestResource::Some, 15), EMPTY_STACK]
        );
    }

    #[test]
    fn insert_stacking_fills_piles_then_empties() {
        let mock = handler(&[
            capped_slot(TestResource::Empty, 0, 10),
            capped_slot(TestResource::Some, 5, 10),
            capped_slot(TestResource::Empty, 0, 10),
        ]);
        assert_eq!(insert_stacking(&mock, &TestResource::Some, 20, None).unwrap(), 20);
        assert_eq!(
            describe_stacks(&mock),
            vec![
                stack(TestResource::Some, 10),
                stack(TestResource::Some, 10),
                stack(TestResource::Some, 5),
            ]
        );
    }

    #[test]
    fn insert_stacking_respects_transaction() {
        let mock = handler(&[EMPTY_SLOT, EMPTY_SLOT]);
        {
            let tx = Transaction::open_root().unwrap();
            let inserted = insert_stacking(&mock, &TestResource::Some, 10, Some(tx.context()));
            assert_eq!(inserted.unwrap(), 10);
            assert_eq!(describe_stacks(&mock), vec![stack(TestResource::Some, 10), EMPTY_STACK]);
        }
        assert_eq!(describe_stacks(&mock), vec![EMPTY_STACK, EMPTY_STACK]);
    }

    // -- extract_first ------------------------------------------------------

    #[test]
    fn extract_first_nothing_to_take() {
        let empty = handler(&[EMPTY_SLOT, EMPTY_SLOT]);
        assert_eq!(extract_first(&empty, any, 10, None).unwrap(), None);

        let filtered = handler_for_stacks(&[stack(TestResource::Some, 5), EMPTY_STACK]);
        assert_eq!(extract_first(&filtered, |_| false, 10, None).unwrap(), None);
        assert_eq!(extract_first(&filtered, any, 0, None).unwrap(), None);
    }

    #[test]
    fn extract_first_amounts() {
        for (requested, taken, left) in [(5, 5, 5), (10, 10, 0), (20, 10, 0)] {
            let mock = handler_for_stacks(&[stack(TestResource::Some, 10), EMPTY_STACK]);
            let result = extract_first(&mock, any, requested, None).unwrap();
            assert_eq!(result, Some(stack(TestResource::Some, taken)));
            assert_eq!(mock.amount(0).unwrap(), left);
        }
    }

    #[test]
    fn extract_first_respects_transaction() {
        let mock = handler_for_stacks(&[stack(TestResource::Some, 10), EMPTY_STACK]);
        {
            let tx = Transaction::open_root().unwrap();
            let result = extract_first(&mock, any, 5, Some(tx.context())).unwrap();
            assert_eq!(result, Some(stack(TestResource::Some, 5)));
            assert_eq!(mock.amount(0).unwrap(), 5);
        }
        assert_eq!(
            describe_stacks(&mock),
            vec![stack(TestResource::Some, 10), EMPTY_STACK]
        );
    }

    #[test]
    fn extract_first_when_extraction_refused() {
        let mock = handler_for_stacks(&[
            stack(TestResource::Some, 10),
            stack(TestResource::Other1, 5),
        ]);
        mock.set_extraction_enabled(false);
        assert_eq!(extract_first(&mock, any, 10, None).unwrap(), None);
        assert_eq!(
            describe_stacks(&mock),
            vec![stack(TestResource::Some, 10), stack(TestResource::Other1, 5)]
        );
    }

    // -- find_extractable ---------------------------------------------------

    #[test]
    fn find_extractable_skips_zero_amounts() {
        let mock = handler_for_stacks(&[
            stack(TestResource::Some, 0),
            stack(TestResource::Other1, 5),
            stack(TestResource::Other2, 7),
        ]);
        assert_eq!(find_extractable(&mock, any, None).unwrap(), Some(TestResource::Other1));
        assert_eq!(
            find_extractable(&mock, |r| *r == TestResource::Other2, None).unwrap(),
            Some(TestResource::Other2)
        );
        assert_eq!(
            find_extractable(&mock, |r| *r == TestResource::Other3, None).unwrap(),
            None
        );
    }

    #[test]
    fn find_extractable_leaves_contents_alone() {
        let mock = handler_for_stacks(&[stack(TestResource::Some, 5)]);
        find_extractable(&mock, any, None).unwrap();
        assert_eq!(describe_stacks(&mock), vec![stack(TestResource::Some, 5)]);

        let tx = Transaction::open_root().unwrap();
        find_extractable(&mock, any, Some(tx.context())).unwrap();
        assert_eq!(describe_stacks(&mock), vec![stack(TestResource::Some, 5)]);
    }

    #[test]
    fn find_extractable_when_extraction_refused() {
        let mock = handler_for_stacks(&[stack(TestResource::Some, 5)]);
        mock.set_extraction_enabled(false);
        assert_eq!(find_extractable(&mock, any, None).unwrap(), None);
    }

    // -- move_resources -----------------------------------------------------

    #[test]
    fn move_nothing() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 5)]);
        let target = handler(&[EMPTY_SLOT]);
        assert_eq!(move_resources(&source, &target, any, 0, None).unwrap(), 0);
        let empty = handler(&[EMPTY_SLOT]);
        assert_eq!(move_resources(&empty, &target, any, 10, None).unwrap(), 0);
        assert_eq!(describe_stacks(&target), vec![EMPTY_STACK]);
    }

    #[test]
    fn move_amounts() {
        for (requested, moved, left) in [(5, 5, 5), (10, 10, 0), (20, 10, 0)] {
            let source = handler_for_stacks(&[stack(TestResource::Some, 10)]);
            let target = handler(&[EMPTY_SLOT]);
            assert_eq!(move_resources(&source, &target, any, requested, None).unwrap(), moved);
            assert_eq!(source.amount(0).unwrap(), left);
            assert_eq!(target.amount(0).unwrap(), moved);
        }
    }

    #[test]
    fn move_respects_filter() {
        let source = handler_for_stacks(&[
            stack(TestResource::Some, 10),
            stack(TestResource::Other1, 5),
            stack(TestResource::Other2, 7),
        ]);
        let target = handler(&[EMPTY_SLOT, EMPTY_SLOT, EMPTY_SLOT]);
        let moved = move_resources(
            &source,
            &target,
            |r| matches!(r, TestResource::Other1 | TestResource::Other2),
            20,
            None,
        )
        .unwrap();
        assert_eq!(moved, 12);
        assert_eq!(
            describe_stacks(&source),
            vec![stack(TestResource::Some, 10), EMPTY_STACK, EMPTY_STACK]
        );
        assert_eq!(
            describe_stacks(&target),
            vec![stack(TestResource::Other1, 5), stack(TestResource::Other2, 7), EMPTY_STACK]
        );
    }

    #[test]
    fn move_respects_transaction() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 10)]);
        let target = handler(&[EMPTY_SLOT]);
        {
            let tx = Transaction::open_root().unwrap();
            assert_eq!(move_resources(&source, &target, any, 5, Some(tx.context())).unwrap(), 5);
        }
        assert_eq!(describe_stacks(&source), vec![stack(TestResource::Some, 10)]);
        assert_eq!(describe_stacks(&target), vec![EMPTY_STACK]);
    }

    #[test]
    fn move_limited_by_target_capacity() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 10)]);
        let target = handler(&[capped_slot(TestResource::Empty, 0, 3)]);
        assert_eq!(move_resources(&source, &target, any, 10, None).unwrap(), 3);
        assert_eq!(source.amount(0).unwrap(), 7);
        assert_eq!(target.amount(0).unwrap(), 3);
    }

    #[test]
    fn move_failure_is_wrapped_and_rolled_back() {
        let source = handler_for_stacks(&[
            stack(TestResource::Some, 4),
            stack(TestResource::Other1, 4),
        ]);
        let target = Rc::new(handler(&[EMPTY_SLOT, EMPTY_SLOT]));
        let combined =
            CombinedHandler::new(vec![target.clone() as Rc<dyn ResourceHandler<TestResource>>]);
        target.fail_with("conveyor jammed");

        let err = move_resources(&source, &combined, any, 8, None).unwrap_err();
        let TransferError::Move { context, source: cause } = &err else {
            panic!("expected a wrapped move failure, got {err:?}");
        };
        assert_eq!(context.operation, "move_resources");
        assert!(context.from.contains("MockHandler"));
        assert!(context.to.starts_with("CombinedHandler"));
        assert_eq!(context.amount, 8);
        assert!(context.transaction.is_none());
        assert!(matches!(**cause, TransferError::Handler { .. }));
        assert!(matches!(
            err.root_cause(),
            TransferError::Handler { message } if message == "conveyor jammed"
        ));

        assert_eq!(source.amount(0).unwrap(), 4);
        assert_eq!(source.amount(1).unwrap(), 4);
        assert_eq!(total_amount(&*target), 0);
    }

    #[test]
    fn move_first_failure_is_wrapped() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 4)]);
        let target = handler(&[EMPTY_SLOT]);
        source.fail_with("stuck");
        let err = move_first(&source, &target, any, 4, None).unwrap_err();
        assert!(matches!(
            &err,
            TransferError::Move { context, .. } if context.operation == "move_first"
        ));
        assert!(err.to_string().contains("move_first"));
    }

    #[test]
    fn move_failure_mentions_ambient_transaction() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 4)]);
        let target = handler(&[EMPTY_SLOT]);
        target.fail_with("full of gremlins");
        let tx = Transaction::open_root().unwrap();
        let err = move_resources(&source, &target, any, 4, Some(tx.context())).unwrap_err();
        let TransferError::Move { context, .. } = err else {
            panic!("expected a wrapped move failure");
        };
        assert!(context.transaction.unwrap().starts_with("Transaction[depth=0"));
        // The ambient transaction is still usable.
        assert!(tx.is_open());
        assert_eq!(source.amount(0).unwrap(), 4);
    }

    // -- move_first ---------------------------------------------------------

    #[test]
    fn move_first_nothing() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 5)]);
        let target = handler(&[EMPTY_SLOT]);
        assert_eq!(move_first(&source, &target, any, 0, None).unwrap(), None);
        let empty = handler(&[EMPTY_SLOT]);
        assert_eq!(move_first(&empty, &target, any, 10, None).unwrap(), None);
    }

    #[test]
    fn move_first_limited_by_target_capacity() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 10)]);
        let target = handler(&[capped_slot(TestResource::Empty, 0, 5)]);
        assert_eq!(
            move_first(&source, &target, any, 10, None).unwrap(),
            Some(stack(TestResource::Some, 5))
        );
    }

    #[test]
    fn move_first_skips_rejected_resource() {
        let source = handler_for_stacks(&[
            stack(TestResource::Some, 1),
            stack(TestResource::Other1, 1),
        ]);
        let target = handler(&[capped_slot(TestResource::Empty, 0, 5)]);
        target.set_valid(0, &[TestResource::Other1]);
        assert_eq!(
            move_first(&source, &target, any, 1, None).unwrap(),
            Some(stack(TestResource::Other1, 1))
        );
    }

    #[test]
    fn move_first_sticks_to_selected_resource() {
        let source = handler_for_stacks(&[
            stack(TestResource::Some, 10),
            stack(TestResource::Other1, 5),
            stack(TestResource::Other2, 7),
            stack(TestResource::Other1, 2),
        ]);
        let target = handler(&[EMPTY_SLOT]);
        let result = move_first(&source, &target, |r| *r == TestResource::Other1, 6, None).unwrap();
        assert_eq!(result, Some(stack(TestResource::Other1, 6)));
        assert_eq!(
            describe_stacks(&source),
            vec![
                stack(TestResource::Some, 10),
                EMPTY_STACK,
                stack(TestResource::Other2, 7),
                stack(TestResource::Other1, 1),
            ]
        );
        assert_eq!(describe_stacks(&target), vec![stack(TestResource::Other1, 6)]);
    }

    #[test]
    fn move_first_respects_transaction() {
        let source = handler_for_stacks(&[stack(TestResource::Some, 10)]);
        let target = handler(&[EMPTY_SLOT]);
        {
            let tx = Transaction::open_root().unwrap();
            assert_eq!(
                move_first(&source, &target, any, 5, Some(tx.context())).unwrap(),
                Some(stack(TestResource::Some, 5))
            );
        }
        assert_eq!(describe_stacks(&source), vec![stack(TestResource::Some, 10)]);
        assert_eq!(describe_stacks(&target), vec![EMPTY_STACK]);
    }
}
