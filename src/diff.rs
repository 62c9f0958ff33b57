//! Address-set diff: the ~2% of the core that decides whether a refresh
//! write is actually needed.

use std::collections::HashSet;

/// Returns `true` iff `left` and `right`, read as unordered, duplicate-collapsed
/// sets, differ. Order and repeated elements within either input are ignored.
pub fn differs<A, B>(left: &[A], right: &[B]) -> bool
where
	A: AsRef<str>,
	B: AsRef<str>,
{
	let left: HashSet<&str> = left.iter().map(AsRef::as_ref).collect();
	let right: HashSet<&str> = right.iter().map(AsRef::as_ref).collect();
	left != right
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identical_sets_do_not_differ() {
		assert!(!differs(&["a", "b"], &["b", "a"]));
	}

	#[test]
	fn duplicates_collapse() {
		assert!(!differs(&["a", "a", "b"], &["b", "a"]));
	}

	#[test]
	fn extra_element_differs() {
		assert!(differs(&["a", "b"], &["a", "b", "c"]));
	}

	#[test]
	fn missing_element_differs() {
		assert!(differs(&["a", "b", "c"], &["a", "b"]));
	}

	#[test]
	fn empty_sets_do_not_differ() {
		let empty: [&str; 0] = [];
		assert!(!differs(&empty, &empty));
	}
}
