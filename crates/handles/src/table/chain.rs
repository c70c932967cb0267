//! Intrusive ownership chains.
//!
//! An identity slot's `prev` is the head and `next` the tail of the chain of
//! handles it owns. Member slots use `prev`/`next` as neighbour links. Both
//! operations touch at most three slots and never scan.

use super::SlotTable;

impl SlotTable {
	/// Appends `index` to the tail of the chain owned by `owner`.
	pub fn link(&mut self, owner: u32, index: u32) {
		let tail = self[owner].next;
		match tail {
			Some(tail) => {
				self[tail].next = Some(index);
				self[owner].next = Some(index);
			}
			None => {
				self[owner].prev = Some(index);
				self[owner].next = Some(index);
			}
		}

		let node = &mut self[index];
		node.prev = tail;
		node.next = None;

		self[owner].usage.owned += 1;
	}

	/// Removes `index` from the chain owned by `owner`.
	pub fn unlink(&mut self, owner: u32, index: u32) {
		let (prev, next) = {
			let node = &mut self[index];
			(node.prev.take(), node.next.take())
		};

		match prev {
			Some(prev) => self[prev].next = next,
			None => self[owner].prev = next,
		}
		match next {
			Some(next) => self[next].prev = prev,
			None => self[owner].next = prev,
		}

		let usage = &mut self[owner].usage;
		usage.owned = usage.owned.saturating_sub(1);
	}

	/// Head of the chain owned by `owner`.
	pub fn chain_head(&self, owner: u32) -> Option<u32> {
		self[owner].prev
	}

	/// Tail of the chain owned by `owner`.
	pub fn chain_tail(&self, owner: u32) -> Option<u32> {
		self[owner].next
	}

	/// Walks the chain owned by `owner` from head to tail.
	pub fn chain(&self, owner: u32) -> impl Iterator<Item = u32> + '_ {
		std::iter::successors(self.chain_head(owner), move |&i| self[i].next)
	}
}
