//! C policy lists.
//!
//! ```c
//! struct ermalloc_policy_list {
//!     enum ermalloc_policy policy;
//!     void* policy_data;
//!     struct ermalloc_policy_list* next_policy;
//! };
//! ```
//!
//! The list is walked head first; the head becomes the innermost policy.
//! Redundancy reads an optional `const uint32_t*` copy count from
//! `policy_data`; NULL selects the configured default. ReedSolomon reads an
//! optional `const uint32_t*` parity length the same way, NULL meaning three
//! bytes. Nil ignores it.

use std::ffi::{c_uint, c_void};

use ermalloc_core::{
    MAX_POLICIES, Policy, PolicyChain, PolicyError, PolicyKind, ReedSolomonPolicy,
};
use ermalloc_membrane::HeapConfig;

/// One node of a C policy list.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ErPolicyList {
    pub policy: c_uint,
    pub policy_data: *const c_void,
    pub next_policy: *const ErPolicyList,
}

impl ErPolicyList {
    /// Node for `kind` with no data and no successor.
    #[must_use]
    pub const fn new(kind: PolicyKind) -> Self {
        Self {
            policy: match kind {
                PolicyKind::Nil => 0,
                PolicyKind::Redundancy => 1,
                PolicyKind::ReedSolomon => 2,
            },
            policy_data: std::ptr::null(),
            next_policy: std::ptr::null(),
        }
    }

    /// # Safety
    ///
    /// `policy_data`, when non-null, must point to a readable value of the
    /// type this kind expects.
    unsafe fn to_policy(self, config: &HeapConfig) -> Result<Policy, PolicyError> {
        match PolicyKind::from_raw(self.policy)? {
            PolicyKind::Nil => Ok(Policy::Nil),
            PolicyKind::Redundancy => {
                let data = self.policy_data.cast::<u32>();
                if data.is_null() {
                    Ok(config.default_redundancy())
                } else {
                    // SAFETY: forwarded caller contract.
                    Policy::redundancy(unsafe { data.read_unaligned() })
                }
            }
            PolicyKind::ReedSolomon => {
                let data = self.policy_data.cast::<u32>();
                if data.is_null() {
                    Ok(Policy::ReedSolomon(ReedSolomonPolicy::default()))
                } else {
                    // SAFETY: forwarded caller contract.
                    Policy::reed_solomon(unsafe { data.read_unaligned() })
                }
            }
        }
    }
}

/// Convert a C policy list into a chain. NULL is the empty chain.
///
/// Lists longer than [`MAX_POLICIES`] are rejected without reading past the
/// limit, so a cyclic list fails instead of looping.
///
/// # Safety
///
/// `list` must be null or point to a valid node chain whose nodes satisfy
/// [`ErPolicyList`]'s data contract.
pub unsafe fn chain_from_list(
    list: *const ErPolicyList,
    config: &HeapConfig,
) -> Result<PolicyChain, PolicyError> {
    let mut chain = PolicyChain::empty();
    let mut node = list;
    let mut seen = 0usize;
    while !node.is_null() {
        seen += 1;
        if seen > MAX_POLICIES {
            return Err(PolicyError::TooManyPolicies {
                requested: seen,
                max: MAX_POLICIES,
            });
        }
        // SAFETY: forwarded caller contract.
        let current = unsafe { node.read() };
        // SAFETY: forwarded caller contract.
        chain = chain.with(unsafe { current.to_policy(config) }?)?;
        node = current.next_policy;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeapConfig {
        HeapConfig::default()
    }

    #[test]
    fn null_list_is_empty_chain() {
        let chain = unsafe { chain_from_list(std::ptr::null(), &config()) }.unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn head_becomes_innermost() {
        let copies: u32 = 5;
        let mut outer = ErPolicyList::new(PolicyKind::Redundancy);
        outer.policy_data = (&copies as *const u32).cast();
        let mut head = ErPolicyList::new(PolicyKind::Nil);
        head.next_policy = &outer;
        let chain = unsafe { chain_from_list(&head, &config()) }.unwrap();
        assert_eq!(
            chain.as_slice(),
            &[Policy::Nil, Policy::redundancy(5).unwrap()]
        );
    }

    #[test]
    fn null_data_uses_configured_default() {
        let node = ErPolicyList::new(PolicyKind::Redundancy);
        let config = HeapConfig::from_vars(None, Some("7"));
        let chain = unsafe { chain_from_list(&node, &config) }.unwrap();
        assert_eq!(chain.as_slice(), &[Policy::redundancy(7).unwrap()]);
    }

    #[test]
    fn reed_solomon_entries_decode() {
        let ecc: u32 = 8;
        let mut outer = ErPolicyList::new(PolicyKind::ReedSolomon);
        outer.policy_data = (&ecc as *const u32).cast();
        let mut head = ErPolicyList::new(PolicyKind::ReedSolomon);
        head.next_policy = &outer;
        assert_eq!(head.policy, 2);
        let chain = unsafe { chain_from_list(&head, &config()) }.unwrap();
        assert_eq!(
            chain.as_slice(),
            &[
                Policy::reed_solomon(3).unwrap(),
                Policy::reed_solomon(8).unwrap()
            ]
        );

        let zero: u32 = 0;
        let mut node = ErPolicyList::new(PolicyKind::ReedSolomon);
        node.policy_data = (&zero as *const u32).cast();
        assert!(matches!(
            unsafe { chain_from_list(&node, &config()) },
            Err(PolicyError::InvalidEcc { requested: 0, .. })
        ));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let mut node = ErPolicyList::new(PolicyKind::Nil);
        node.policy = 9;
        assert_eq!(
            unsafe { chain_from_list(&node, &config()) },
            Err(PolicyError::UnknownKind(9))
        );

        let copies: u32 = 1;
        let mut node = ErPolicyList::new(PolicyKind::Redundancy);
        node.policy_data = (&copies as *const u32).cast();
        assert!(matches!(
            unsafe { chain_from_list(&node, &config()) },
            Err(PolicyError::InvalidCopies { requested: 1, .. })
        ));
    }

    #[test]
    fn long_and_cyclic_lists_are_rejected() {
        let mut nodes = [ErPolicyList::new(PolicyKind::Nil); 4];
        for i in 0..3 {
            let next: *const ErPolicyList = &nodes[i + 1];
            nodes[i].next_policy = next;
        }
        assert!(matches!(
            unsafe { chain_from_list(&nodes[0], &config()) },
            Err(PolicyError::TooManyPolicies { requested: 4, max: 3 })
        ));

        let mut cyclic = ErPolicyList::new(PolicyKind::Nil);
        let itself: *const ErPolicyList = &cyclic;
        cyclic.next_policy = itself;
        assert!(unsafe { chain_from_list(&cyclic, &config()) }.is_err());
    }
}
