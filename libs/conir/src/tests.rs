use std::collections::BTreeSet;

use diagnostics::Diagnostic;
use test_log::test;

use crate::validation::{validate_routes, Cause, ValidatorIssue};
use crate::*;

/// The hierarchy from the `Range` module documentation: a bank `a` of
/// width 2, each containing a bank `b` of width 2, each with a multiport
/// `p` of width 2.
fn abp_tree() -> (InstanceTree, ReactorId, ReactorId, PortId) {
    let mut tree = InstanceTree::new("main");
    let a = tree.add_reactor(tree.root(), "a", 2);
    let b = tree.add_reactor(a, "b", 2);
    let p = tree.add_port(b, "p", 2);
    (tree, a, b, p)
}

fn set<const N: usize>(values: [usize; N]) -> BTreeSet<usize> {
    BTreeSet::from(values)
}

#[test]
fn width_composition() {
    let mut tree = InstanceTree::new("main");
    let a = tree.add_reactor(tree.root(), "a", 2);
    let b = tree.add_reactor(a, "b", 3);
    let p = tree.add_port(b, "p", 4);

    assert_eq!(tree.root().max_width(&tree), 1);
    assert_eq!(a.max_width(&tree), 2);
    assert_eq!(b.max_width(&tree), 6);
    assert_eq!(p.max_width(&tree), 24);

    assert_eq!(p.full_name(&tree), "main.a.b.p");
    assert_eq!(b.full_name(&tree), "main.a.b");
    assert_eq!(tree.children(a), &[b]);
    assert_eq!(tree.ports_of(b), &[p]);
}

#[test]
#[should_panic]
fn zero_width_reactor_rejected() {
    let mut tree = InstanceTree::new("main");
    tree.add_reactor(tree.root(), "a", 0);
}

#[test]
#[should_panic]
fn out_of_bounds_range_rejected() {
    let (tree, _, _, p) = abp_tree();
    Range::new(&tree, p, 5, 4);
}

#[test]
fn worked_interleaving_scenario() {
    let (tree, a, b, p) = abp_tree();
    let range = Range::new(&tree, p, 3, 4);

    assert_eq!(range.instances(&tree), set([3, 4, 5, 6]));
    assert_eq!(range.ancestor_instances(&tree, b).unwrap(), set([1, 2, 3]));
    assert_eq!(range.ancestor_instances(&tree, a).unwrap(), set([0, 1]));
    assert_eq!(
        range.ancestor_instances(&tree, tree.root()).unwrap(),
        set([0])
    );

    // Interleaving b swaps which of b and p varies fastest, but at this
    // start and width the leaf membership happens to be unchanged.
    let range = range.toggle_interleaved(&tree, b).unwrap();
    assert_eq!(range.instances(&tree), set([3, 4, 5, 6]));

    let range = range.toggle_interleaved(&tree, a).unwrap();
    assert_eq!(range.instances(&tree), set([1, 3, 5, 6]));

    let range = range.toggle_interleaved(&tree, b).unwrap();
    assert_eq!(range.instances(&tree), set([2, 3, 5, 6]));
}

#[test]
fn interleave_involution() {
    let (tree, a, b, p) = abp_tree();
    let range = Range::new(&tree, p, 3, 4);

    let toggled_twice = range
        .toggle_interleaved(&tree, b)
        .unwrap()
        .toggle_interleaved(&tree, b)
        .unwrap();
    assert_eq!(toggled_twice, range);

    // Nested toggles unwind regardless of order.
    let unwound = range
        .toggle_interleaved(&tree, a)
        .unwrap()
        .toggle_interleaved(&tree, b)
        .unwrap()
        .toggle_interleaved(&tree, a)
        .unwrap()
        .toggle_interleaved(&tree, b)
        .unwrap();
    assert_eq!(unwound, range);
}

#[test]
fn invalid_levels() {
    let (mut tree, a, b, p) = abp_tree();
    let sibling = tree.add_reactor(tree.root(), "c", 3);
    let range = Range::new(&tree, p, 0, 4);

    assert_eq!(
        range.toggle_interleaved(&tree, tree.root()),
        Err(InvalidLevel { level: tree.root() })
    );
    assert_eq!(
        range.toggle_interleaved(&tree, sibling),
        Err(InvalidLevel { level: sibling })
    );
    assert_eq!(
        range.ancestor_instances(&tree, sibling),
        Err(InvalidLevel { level: sibling })
    );
    assert!(range.toggle_interleaved(&tree, a).is_ok());
    assert!(range.toggle_interleaved(&tree, b).is_ok());
}

#[test]
fn slice_composition() {
    let (tree, _, b, p) = abp_tree();
    let range = Range::new(&tree, p, 3, 4);

    // tail(a).head(b - a) denotes exactly [start + a, start + b).
    assert_eq!(
        range.tail(1).unwrap().head(2).unwrap(),
        Range::new(&tree, p, 4, 2)
    );
    assert_eq!(
        range.tail(0).unwrap().head(4).unwrap(),
        Range::new(&tree, p, 3, 4)
    );

    // Slicing preserves interleaving.
    let interleaved = range.toggle_interleaved(&tree, b).unwrap();
    assert_eq!(
        interleaved.tail(1).unwrap().head(2).unwrap(),
        Range::new(&tree, p, 4, 2)
            .toggle_interleaved(&tree, b)
            .unwrap()
    );
}

#[test]
fn toggle_and_slice_commute() {
    let (tree, _, b, p) = abp_tree();
    let range = Range::new(&tree, p, 3, 4);

    let toggle_then_slice = range.toggle_interleaved(&tree, b).unwrap().head(2).unwrap();
    let slice_then_toggle = range.head(2).unwrap().toggle_interleaved(&tree, b).unwrap();
    assert_eq!(toggle_then_slice, slice_then_toggle);

    let toggle_then_tail = range.toggle_interleaved(&tree, b).unwrap().tail(1).unwrap();
    let tail_then_toggle = range.tail(1).unwrap().toggle_interleaved(&tree, b).unwrap();
    assert_eq!(toggle_then_tail, tail_then_toggle);
}

#[test]
fn degenerate_slices() {
    let (tree, _, _, p) = abp_tree();
    let range = Range::new(&tree, p, 3, 4);

    assert_eq!(range.head(0), None);
    assert_eq!(range.tail(4), None);
    assert_eq!(range.tail(7), None);
    assert_eq!(range.tail(0), Some(range.clone()));
    // A head wider than the range leaves it unchanged.
    assert_eq!(range.head(100), Some(range.clone()));

    let full = Range::full(&tree, p);
    assert_eq!(full.start(), 0);
    assert_eq!(full.width(), 8);
    assert!(full.contains(7));
    assert!(!full.contains(8));
}

/// A tree with one sending reactor and two receiving bank declarations.
fn fanout_tree() -> (InstanceTree, PortId, PortId, PortId) {
    let mut tree = InstanceTree::new("main");
    let source = tree.add_reactor(tree.root(), "src", 1);
    let out = tree.add_port(source, "out", 2);
    let sink = tree.add_reactor(tree.root(), "sink", 4);
    let input = tree.add_port(sink, "in", 1);
    let other = tree.add_reactor(tree.root(), "other", 2);
    let other_input = tree.add_port(other, "in", 1);
    (tree, out, input, other_input)
}

#[test]
fn destination_width_invariant() {
    let (mut tree, out, input, _) = fanout_tree();
    let odd = tree.add_reactor(tree.root(), "odd", 3);
    let odd_input = tree.add_port(odd, "in", 1);

    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));
    send.add_destination(Range::full(&tree, input)).unwrap();
    assert_eq!(send.destinations().len(), 1);

    // Width 3 is not a multiple of 2; the destination list must be
    // untouched afterwards.
    let err = send
        .add_destination(Range::full(&tree, odd_input))
        .unwrap_err();
    assert_eq!(
        err,
        WidthMismatch {
            sender_width: 2,
            destination_width: 3,
        }
    );
    assert_eq!(
        err.to_string(),
        "destination width 3 is not a multiple of sender width 2"
    );
    // An error with plain integer payloads carries no underlying cause.
    assert!(std::error::Error::source(&err).is_none());
    assert_eq!(send.destinations().len(), 1);
}

#[test]
fn slicing_propagates_to_destinations() {
    let (tree, out, input, other_input) = fanout_tree();
    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));
    send.add_destination(Range::full(&tree, input)).unwrap();
    send.add_destination(Range::full(&tree, other_input)).unwrap();

    let head = send.head(1).unwrap();
    assert_eq!(head.width(), 1);
    for (sliced, original) in head.destinations().iter().zip(send.destinations()) {
        assert_eq!(*sliced, original.head(1).unwrap());
    }

    let tail = send.tail(1).unwrap();
    assert_eq!(tail.start(), 1);
    assert_eq!(tail.width(), 1);
    for (sliced, original) in tail.destinations().iter().zip(send.destinations()) {
        assert_eq!(*sliced, original.tail(1).unwrap());
    }

    assert_eq!(send.head(0), None);
    assert_eq!(send.tail(2), None);
}

#[test]
fn destination_reactors_merge_per_declaration() {
    let (tree, out, input, other_input) = fanout_tree();
    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));

    // Three ranges into the same bank declaration, with overlap: indices
    // {0,1}, {2,3}, and {1,2} must union to four distinct reactors.
    send.add_destination(Range::new(&tree, input, 0, 2)).unwrap();
    send.add_destination(Range::new(&tree, input, 2, 2)).unwrap();
    send.add_destination(Range::new(&tree, input, 1, 2)).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 4);

    // A different declaration's indices are counted separately, even
    // though they collide numerically with the first bank's.
    send.add_destination(Range::full(&tree, other_input)).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 6);
}

#[test]
fn destination_reactors_honor_interleaving() {
    let mut tree = InstanceTree::new("main");
    let source = tree.add_reactor(tree.root(), "src", 1);
    let out = tree.add_port(source, "out", 1);
    let sink = tree.add_reactor(tree.root(), "sink", 2);
    let multi = tree.add_port(sink, "q", 2);

    // Channels 0 and 1 of bank element 0.
    let inside_one_bank = Range::new(&tree, multi, 0, 2);
    let mut send = SendRange::new(Range::new(&tree, out, 0, 1));
    send.add_destination(inside_one_bank.clone()).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 1);

    // Interleaved, the same two positions land on channel 0 of both bank
    // elements.
    let across_banks = inside_one_bank.toggle_interleaved(&tree, sink).unwrap();
    assert_eq!(across_banks.instances(&tree), set([0, 2]));
    let mut send = SendRange::new(Range::new(&tree, out, 0, 1));
    send.add_destination(across_banks).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 2);
}

#[test]
fn destination_reactor_count_invalidated_on_append() {
    let (tree, out, input, other_input) = fanout_tree();
    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));
    send.add_destination(Range::new(&tree, input, 0, 2)).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 2);

    send.add_destination(Range::full(&tree, other_input)).unwrap();
    assert_eq!(send.num_destination_reactors(&tree), 4);
}

#[test]
fn with_source_narrows_both_ways() {
    let mut tree = InstanceTree::new("main");
    let source = tree.add_reactor(tree.root(), "src", 1);
    let out = tree.add_port(source, "out", 4);
    let sink = tree.add_reactor(tree.root(), "sink", 4);
    let input = tree.add_port(sink, "in", 1);
    let upstream = tree.add_reactor(tree.root(), "up", 1);
    let up = tree.add_port(upstream, "y", 2);

    // Upstream narrower than the send range: everything clips to width 2.
    let mut send = SendRange::new(Range::full(&tree, out));
    send.add_destination(Range::full(&tree, input)).unwrap();
    let narrow = Range::full(&tree, up);
    let derived = send.with_source(&narrow);
    assert_eq!(derived.source(), &narrow);
    assert_eq!(derived.destinations(), &[Range::new(&tree, input, 0, 2)]);

    // Upstream wider than the send range: the new source clips instead.
    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));
    send.add_destination(Range::new(&tree, input, 0, 2)).unwrap();
    let wide = Range::full(&tree, out);
    let derived = send.with_source(&wide);
    assert_eq!(derived.source(), &Range::new(&tree, out, 0, 2));
    assert_eq!(derived.destinations(), &[Range::new(&tree, input, 0, 2)]);
}

#[test]
fn send_range_ordering_is_deterministic() {
    let mut tree = InstanceTree::new("main");
    let source = tree.add_reactor(tree.root(), "src", 1);
    let x = tree.add_port(source, "x", 2);
    let y = tree.add_port(source, "y", 2);
    let sink = tree.add_reactor(tree.root(), "sink", 2);
    let input = tree.add_port(sink, "in", 1);

    let mut rich = SendRange::new(Range::full(&tree, x));
    rich.add_destination(Range::full(&tree, input)).unwrap();
    rich.add_destination(Range::full(&tree, input)).unwrap();
    let mut poor = SendRange::new(Range::full(&tree, x));
    poor.add_destination(Range::full(&tree, input)).unwrap();
    let mut later = SendRange::new(Range::full(&tree, y));
    later.add_destination(Range::full(&tree, input)).unwrap();

    let mut first = vec![poor.clone(), later.clone(), rich.clone()];
    first.sort_by(|left, right| left.cmp_within(right, &tree));
    let mut second = vec![later, rich.clone(), poor.clone()];
    second.sort_by(|left, right| left.cmp_within(right, &tree));

    // Same source: more destinations first. Then name order.
    assert_eq!(first[0], rich);
    assert_eq!(first[1], poor);
    assert_eq!(first[0].anchor().full_name(&tree), "main.src.x");
    assert_eq!(first[2].anchor().full_name(&tree), "main.src.y");
    assert_eq!(first, second);
}

#[test]
fn validate_accepts_well_formed_routes() {
    let (tree, out, input, other_input) = fanout_tree();
    let mut send = SendRange::new(Range::new(&tree, out, 0, 2));
    send.add_destination(Range::full(&tree, input)).unwrap();
    send.add_destination(Range::full(&tree, other_input)).unwrap();

    let issues = validate_routes(&tree, &[send]);
    assert!(issues.is_empty());
}

#[test]
fn validate_warns_on_missing_destinations() {
    let (tree, out, _, _) = fanout_tree();
    let send = SendRange::new(Range::new(&tree, out, 0, 2));

    let issues = validate_routes(&tree, &[send]);
    assert!(!issues.has_error());
    assert!(issues.has_warning());
    assert_eq!(issues.len(), 1);
    assert!(matches!(
        issues.iter().next().unwrap().cause(),
        Cause::NoDestinations { .. }
    ));
}

#[test]
fn validate_catches_routes_from_another_tree() {
    // Routes resolved against one tree, checked against a structurally
    // different one: the identifiers resolve, but to the wrong shapes.
    let (big, a, _, p) = abp_tree();
    let source = Range::new(&big, p, 3, 4).toggle_interleaved(&big, a).unwrap();
    let mut send = SendRange::new(source);
    send.add_destination(Range::full(&big, p)).unwrap();

    let mut small = InstanceTree::new("main");
    let _sibling = small.add_reactor(small.root(), "c", 1);
    let bank = small.add_reactor(small.root(), "d", 4);
    small.add_port(bank, "p", 1);

    let issues = validate_routes(&small, &[send.clone()]);
    assert_eq!(issues.num_errors(), 3);
    let causes: Vec<_> = issues.iter().map(ValidatorIssue::cause).collect();
    assert!(causes
        .iter()
        .any(|cause| matches!(cause, Cause::RangeOutOfBounds { .. })));
    assert!(causes
        .iter()
        .any(|cause| matches!(cause, Cause::NotAnAncestor { .. })));

    // Against an empty tree the anchor itself is dangling; nothing else
    // about the route can be checked.
    let empty = InstanceTree::new("main");
    let issues = validate_routes(&empty, &[send]);
    assert_eq!(issues.len(), 1);
    assert!(matches!(
        issues.iter().next().unwrap().cause(),
        Cause::DanglingInstance { .. }
    ));
}

#[test]
fn validator_issue_messages() {
    let issue = ValidatorIssue::new(
        Cause::WidthNotMultiple {
            source: "main.src.out".into(),
            source_width: 2,
            destination: "main.sink.in".into(),
            destination_width: 3,
        },
        diagnostics::Severity::Error,
    );
    assert_eq!(
        issue.to_string(),
        "destination `main.sink.in` has width 3, \
         which is not a multiple of the width 2 of source `main.src.out`"
    );
    assert!(issue.severity().is_error());
}
