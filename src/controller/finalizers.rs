//! Finalizer handling for VirtualDatabase cleanup
//!
//! Namespaced children are garbage-collected through owner references. The
//! finalizer holds the VDB back until the cluster-scoped objects it created
//! (the console link) have been removed as well.

use kube::ResourceExt;

use crate::crd::VirtualDatabase;

/// Finalizer name used to protect VirtualDatabase resources
pub const VDB_FINALIZER: &str = "teiid.io/vdb-finalizer";

/// Check if the VDB is being deleted
pub fn is_being_deleted(vdb: &VirtualDatabase) -> bool {
    vdb.metadata.deletion_timestamp.is_some()
}

/// Check if the VDB has our finalizer
pub fn has_finalizer(vdb: &VirtualDatabase) -> bool {
    vdb.finalizers().iter().any(|f| f == VDB_FINALIZER)
}

/// Add the finalizer in place; returns whether anything changed
pub fn add_finalizer(vdb: &mut VirtualDatabase) -> bool {
    if has_finalizer(vdb) {
        return false;
    }
    vdb.finalizers_mut().push(VDB_FINALIZER.to_string());
    true
}

/// Remove the finalizer in place; returns whether anything changed
pub fn remove_finalizer(vdb: &mut VirtualDatabase) -> bool {
    let before = vdb.finalizers().len();
    vdb.finalizers_mut().retain(|f| f != VDB_FINALIZER);
    vdb.finalizers().len() != before
}
