// avl.rs
// Layout mirror of the illumos/OpenZFS intrusive AVL tree (sys/avl_impl.h)
//
// These types only describe memory that libzfs owns, such as the trees
// embedded in a `libzfs_handle_t`. Nothing here inserts, removes or
// rebalances; the accessors decode the packed fields the way the C macros
// do so a tree handed over by the library can be inspected.

use std::ffi::{c_int, c_void};
use std::ptr;

/// Low bits of `avl_pcb` that do not belong to the parent pointer.
const PCB_TAG_MASK: usize = 0x7;
const PCB_CHILD_SHIFT: u32 = 2;
const PCB_BALANCE_MASK: usize = 0x3;

/// Side of a parent a node hangs on.
pub const AVL_LEFT: usize = 0;
pub const AVL_RIGHT: usize = 1;

/// `avl_node_t`: embedded in every element of a tree.
///
/// `avl_pcb` packs the parent pointer, which side of the parent this node
/// is on (bit 2) and the balance factor plus one (bits 0..2).
#[repr(C)]
#[derive(Debug)]
pub struct AvlNode {
    pub avl_child: [*mut AvlNode; 2],
    pub avl_pcb: usize,
}

impl AvlNode {
    /// A detached node.
    pub const fn new() -> AvlNode {
        AvlNode {
            avl_child: [ptr::null_mut(); 2],
            avl_pcb: 0,
        }
    }

    /// `AVL_XPARENT`
    pub fn parent(&self) -> *mut AvlNode {
        (self.avl_pcb & !PCB_TAG_MASK) as *mut AvlNode
    }

    /// `AVL_XCHILD`: [`AVL_LEFT`] or [`AVL_RIGHT`].
    pub fn child_index(&self) -> usize {
        (self.avl_pcb >> PCB_CHILD_SHIFT) & 1
    }

    /// `AVL_XBALANCE`: -1, 0 or +1.
    pub fn balance(&self) -> i32 {
        (self.avl_pcb & PCB_BALANCE_MASK) as i32 - 1
    }

    pub fn set_parent(&mut self, parent: *mut AvlNode) {
        self.avl_pcb = (self.avl_pcb & PCB_TAG_MASK) | parent as usize;
    }

    pub fn set_child_index(&mut self, index: usize) {
        self.avl_pcb = (self.avl_pcb & !(1 << PCB_CHILD_SHIFT)) | ((index & 1) << PCB_CHILD_SHIFT);
    }

    pub fn set_balance(&mut self, balance: i32) {
        let biased = (balance + 1) as usize & PCB_BALANCE_MASK;
        self.avl_pcb = (self.avl_pcb & !PCB_BALANCE_MASK) | biased;
    }

    pub fn left(&self) -> *mut AvlNode {
        self.avl_child[AVL_LEFT]
    }

    pub fn right(&self) -> *mut AvlNode {
        self.avl_child[AVL_RIGHT]
    }
}

impl Default for AvlNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Element comparator: negative, zero or positive like `strcmp`.
pub type AvlCompare = unsafe extern "C" fn(*const c_void, *const c_void) -> c_int;

/// `avl_tree_t`
#[repr(C)]
#[derive(Debug)]
pub struct AvlTree {
    pub avl_root: *mut AvlNode,
    pub avl_compar: Option<AvlCompare>,
    /// Byte offset of the [`AvlNode`] inside each element.
    pub avl_offset: usize,
    pub avl_numnodes: std::ffi::c_ulong,
    /// `avl_size` in illumos, padding in OpenZFS
    pub avl_size: usize,
}

impl AvlTree {
    pub fn is_empty(&self) -> bool {
        self.avl_root.is_null()
    }

    pub fn len(&self) -> usize {
        self.avl_numnodes as usize
    }

    /// Element that embeds `node`.
    pub fn element_of(&self, node: *mut AvlNode) -> *mut c_void {
        if node.is_null() {
            return ptr::null_mut();
        }
        (node as usize - self.avl_offset) as *mut c_void
    }

    /// The [`AvlNode`] embedded in `element`.
    pub fn node_of(&self, element: *mut c_void) -> *mut AvlNode {
        if element.is_null() {
            return ptr::null_mut();
        }
        (element as usize + self.avl_offset) as *mut AvlNode
    }
}

/// `avl_index_t`: an insertion point, a node pointer with the child side
/// in bit 0.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AvlIndex(usize);

impl AvlIndex {
    /// `AVL_MKINDEX`
    pub fn new(node: *mut AvlNode, child: usize) -> AvlIndex {
        AvlIndex(node as usize | (child & 1))
    }

    pub fn from_raw(raw: usize) -> AvlIndex {
        AvlIndex(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    /// `AVL_INDEX2NODE`
    pub fn node(self) -> *mut AvlNode {
        (self.0 & !1) as *mut AvlNode
    }

    /// `AVL_INDEX2CHILD`
    pub fn child(self) -> usize {
        self.0 & 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_layout_matches_c() {
        assert_eq!(size_of::<AvlNode>(), 3 * size_of::<usize>());
        assert_eq!(size_of::<AvlIndex>(), size_of::<usize>());
        // root, compar, offset, numnodes, size
        assert_eq!(size_of::<AvlTree>(), 5 * size_of::<usize>());
    }

    #[test]
    fn test_pcb_fields_are_independent() {
        let mut parent = AvlNode::new();
        let parent_ptr: *mut AvlNode = &mut parent;
        let mut node = AvlNode::new();

        node.set_parent(parent_ptr);
        node.set_child_index(AVL_RIGHT);
        node.set_balance(-1);
        assert_eq!(node.parent(), parent_ptr);
        assert_eq!(node.child_index(), AVL_RIGHT);
        assert_eq!(node.balance(), -1);

        node.set_balance(1);
        node.set_child_index(AVL_LEFT);
        assert_eq!(node.parent(), parent_ptr);
        assert_eq!(node.child_index(), AVL_LEFT);
        assert_eq!(node.balance(), 1);

        node.set_parent(ptr::null_mut());
        assert!(node.parent().is_null());
        assert_eq!(node.balance(), 1);
    }

    #[test]
    fn test_fresh_node_reads_unbalanced_left() {
        let node = AvlNode::default();
        assert!(node.parent().is_null());
        assert_eq!(node.child_index(), AVL_LEFT);
        // pcb 0 is balance -1 once biased; avl_insert always writes it
        assert_eq!(node.balance(), -1);
        assert!(node.left().is_null() && node.right().is_null());
    }

    #[test]
    fn test_index_packs_side_into_low_bit() {
        let mut node = AvlNode::new();
        let node_ptr: *mut AvlNode = &mut node;
        let index = AvlIndex::new(node_ptr, AVL_RIGHT);
        assert_eq!(index.node(), node_ptr);
        assert_eq!(index.child(), AVL_RIGHT);
        assert_eq!(AvlIndex::from_raw(index.raw()), index);
        assert_eq!(AvlIndex::new(node_ptr, AVL_LEFT).child(), AVL_LEFT);
    }

    #[test]
    fn test_element_offset_round_trip() {
        #[repr(C)]
        struct Entry {
            key: u64,
            link: AvlNode,
        }
        let mut entry = Entry {
            key: 7,
            link: AvlNode::new(),
        };
        let tree = AvlTree {
            avl_root: ptr::null_mut(),
            avl_compar: None,
            avl_offset: size_of::<u64>(),
            avl_numnodes: 0,
            avl_size: size_of::<Entry>(),
        };
        let element = &mut entry as *mut Entry as *mut c_void;
        let node = tree.node_of(element);
        assert_eq!(node, &mut entry.link as *mut AvlNode);
        assert_eq!(tree.element_of(node), element);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(entry.key, 7);
    }
}
