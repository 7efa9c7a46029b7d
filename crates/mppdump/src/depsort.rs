use std::collections::{BTreeMap, VecDeque};

use tracing::warn;

use crate::error::RunError;

/// What a schema object is, for diagnostics and object counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
	Function,
	Type,
	Table,
	View,
	Sequence,
	Protocol,
}

impl std::fmt::Display for ObjectKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Function => "function",
			Self::Type => "type",
			Self::Table => "table",
			Self::View => "view",
			Self::Sequence => "sequence",
			Self::Protocol => "protocol",
		})
	}
}

/// A schema object that can take part in dependency ordering.
///
/// `fqn` is the canonical `schema.name` form, with the argument signature
/// appended for overloadable objects (`schema.func(integer, text)`);
/// `depends_upon` entries reference other objects by that same form.
pub trait Sortable {
	fn fqn(&self) -> String;
	fn depends_upon(&self) -> &[String];
	fn kind(&self) -> ObjectKind;
}

/// Order `objects` so every object comes after everything it depends on,
/// preserving the input order of objects the dependencies leave unordered.
///
/// This is Kahn's algorithm with a FIFO ready queue seeded in input order:
/// an object becomes ready the moment its last dependency is emitted, and
/// ready objects are emitted strictly first-ready-first-out. Besides being
/// O(V+E), this gives a deterministic output for any input, which keeps
/// consecutive backups of an unchanged database byte-identical.
pub fn topological_sort<T: Sortable>(objects: Vec<T>) -> Result<Vec<T>, RunError> {
	let fqns: Vec<String> = objects.iter().map(Sortable::fqn).collect();

	let mut index_of = BTreeMap::new();
	for (index, fqn) in fqns.iter().enumerate() {
		if index_of.insert(fqn.as_str(), index).is_some() {
			warn!(%fqn, "duplicate object name in dependency sort; keeping the later definition");
		}
	}

	let mut in_degree = vec![0usize; objects.len()];
	let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); objects.len()];
	for (index, object) in objects.iter().enumerate() {
		for dep in object.depends_upon() {
			let Some(&dep_index) = index_of.get(dep.as_str()) else {
				return Err(RunError::UnmetDependency {
					object: fqns[index].clone(),
					missing: dep.clone(),
				});
			};
			in_degree[index] += 1;
			dependents[dep_index].push(index);
		}
	}

	let mut ready: VecDeque<usize> = (0..objects.len())
		.filter(|&index| in_degree[index] == 0)
		.collect();

	let mut order = Vec::with_capacity(objects.len());
	while let Some(index) = ready.pop_front() {
		order.push(index);
		for &dependent in &dependents[index] {
			in_degree[dependent] -= 1;
			if in_degree[dependent] == 0 {
				ready.push_back(dependent);
			}
		}
	}

	if order.len() != objects.len() {
		let emitted: Vec<bool> = {
			let mut emitted = vec![false; objects.len()];
			for &index in &order {
				emitted[index] = true;
			}
			emitted
		};
		return Err(RunError::CycleDetected {
			cycle: describe_cycle(&objects, &fqns, &index_of, &emitted),
		});
	}

	let mut slots: Vec<Option<T>> = objects.into_iter().map(Some).collect();
	Ok(order
		.into_iter()
		.map(|index| slots[index].take().expect("each index emitted once"))
		.collect())
}

/// Walk dependency edges among the unemitted remainder until a name repeats,
/// yielding a `a→b→c→a` trail for the error message.
fn describe_cycle<T: Sortable>(
	objects: &[T],
	fqns: &[String],
	index_of: &BTreeMap<&str, usize>,
	emitted: &[bool],
) -> String {
	let start = (0..objects.len())
		.find(|&index| !emitted[index])
		.expect("a cycle leaves at least one object unemitted");

	let mut trail = vec![start];
	let mut current = start;
	loop {
		let next = objects[current]
			.depends_upon()
			.iter()
			.filter_map(|dep| index_of.get(dep.as_str()).copied())
			.find(|&dep_index| !emitted[dep_index]);
		let Some(next) = next else { break };
		if let Some(position) = trail.iter().position(|&seen| seen == next) {
			trail.push(next);
			return trail[position..]
				.iter()
				.map(|&index| fqns[index].as_str())
				.collect::<Vec<_>>()
				.join("→");
		}
		trail.push(next);
		current = next;
	}

	// Shouldn't happen: every unemitted object sits on or behind a cycle.
	fqns[start].clone()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, PartialEq)]
	struct Obj {
		fqn: String,
		deps: Vec<String>,
		kind: ObjectKind,
	}

	fn obj(fqn: &str, deps: &[&str]) -> Obj {
		Obj {
			fqn: fqn.into(),
			deps: deps.iter().map(|d| (*d).into()).collect(),
			kind: ObjectKind::Table,
		}
	}

	impl Sortable for Obj {
		fn fqn(&self) -> String {
			self.fqn.clone()
		}
		fn depends_upon(&self) -> &[String] {
			&self.deps
		}
		fn kind(&self) -> ObjectKind {
			self.kind
		}
	}

	fn fqns(objects: &[Obj]) -> Vec<&str> {
		objects.iter().map(|o| o.fqn.as_str()).collect()
	}

	#[test]
	fn no_dependencies_keeps_input_order() {
		let sorted = topological_sort(vec![
			obj("public.r1", &[]),
			obj("public.r2", &[]),
			obj("public.r3", &[]),
		])
		.unwrap();
		assert_eq!(fqns(&sorted), ["public.r1", "public.r2", "public.r3"]);
	}

	#[test]
	fn single_dependency_moves_dependent_last() {
		let sorted = topological_sort(vec![
			obj("public.r1", &["public.r3"]),
			obj("public.r2", &[]),
			obj("public.r3", &[]),
		])
		.unwrap();
		assert_eq!(fqns(&sorted), ["public.r2", "public.r3", "public.r1"]);
	}

	#[test]
	fn two_dependents_of_one_object_stay_stable() {
		let sorted = topological_sort(vec![
			obj("public.t1", &["public.t2"]),
			obj("public.t2", &[]),
			obj("public.t3", &["public.t2"]),
		])
		.unwrap();
		assert_eq!(fqns(&sorted), ["public.t2", "public.t1", "public.t3"]);
	}

	#[test]
	fn one_object_with_two_dependencies() {
		let sorted = topological_sort(vec![
			obj("public.t1", &[]),
			obj("public.t2", &["public.t1", "public.t3"]),
			obj("public.t3", &[]),
		])
		.unwrap();
		assert_eq!(fqns(&sorted), ["public.t1", "public.t3", "public.t2"]);
	}

	#[test]
	fn mixed_kinds_sort_globally() {
		// functions, then types, then relations on input; dependencies cross
		// the kind boundaries both ways
		let sorted = topological_sort(vec![
			obj("public.f1", &[]),
			obj("public.f2", &["public.t3"]),
			obj("public.f3", &[]),
			obj("public.t1", &[]),
			obj("public.t2", &["public.r3"]),
			obj("public.t3", &[]),
			obj("public.r1", &[]),
			obj("public.r2", &["public.t1"]),
			obj("public.r3", &[]),
		])
		.unwrap();
		assert_eq!(
			fqns(&sorted),
			[
				"public.f1",
				"public.f3",
				"public.t1",
				"public.t3",
				"public.r1",
				"public.r3",
				"public.r2",
				"public.f2",
				"public.t2",
			]
		);
	}

	#[test]
	fn overloaded_function_names_are_distinct() {
		let sorted = topological_sort(vec![
			obj("public.t1", &[]),
			obj("public.t2", &["public.t1", "public.f(integer, integer)"]),
			obj("public.f(integer, integer)", &["public.t1"]),
		])
		.unwrap();
		assert_eq!(
			fqns(&sorted),
			["public.t1", "public.f(integer, integer)", "public.t2"]
		);
	}

	#[test]
	fn cycle_is_reported_with_the_offending_trail() {
		let err = topological_sort(vec![
			obj("public.t1", &["public.t3"]),
			obj("public.t2", &["public.t1"]),
			obj("public.t3", &["public.t2"]),
		])
		.unwrap_err();
		let RunError::CycleDetected { cycle } = err else {
			panic!("wrong error kind");
		};
		assert_eq!(cycle, "public.t1→public.t3→public.t2→public.t1");
	}

	#[test]
	fn missing_dependency_is_reported() {
		let err = topological_sort(vec![
			obj("public.t1", &["missing_thing", "public.t2"]),
			obj("public.t2", &[]),
		])
		.unwrap_err();
		let RunError::UnmetDependency { object, missing } = err else {
			panic!("wrong error kind");
		};
		assert_eq!(object, "public.t1");
		assert_eq!(missing, "missing_thing");
	}

	#[test]
	fn empty_input_is_fine() {
		let sorted = topological_sort(Vec::<Obj>::new()).unwrap();
		assert!(sorted.is_empty());
	}
}
