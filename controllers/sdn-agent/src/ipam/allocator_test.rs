//! Unit tests for the subnet allocator

#[cfg(test)]
mod tests {
    use crate::error::AllocatorError;
    use crate::ipam::allocator::SubnetAllocator;
    use std::net::Ipv4Addr;

    fn allocator(s: &str) -> SubnetAllocator {
        SubnetAllocator::new(s.parse().unwrap())
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocate_next_is_lowest_first() {
        let mut alloc = allocator("10.1.0.0/29");
        assert_eq!(alloc.capacity(), 6);

        let handed: Vec<Ipv4Addr> = (0..6).map(|_| alloc.allocate_next().unwrap()).collect();
        assert_eq!(handed.first(), Some(&ip("10.1.0.1")));
        assert_eq!(handed.last(), Some(&ip("10.1.0.6")));
        assert_eq!(
            alloc.allocate_next(),
            Err(AllocatorError::PoolExhausted("10.1.0.0/29".parse().unwrap()))
        );
    }

    #[test]
    fn test_allocate_specific() {
        let mut alloc = allocator("10.1.0.0/24");
        alloc.allocate(ip("10.1.0.10")).unwrap();

        assert_eq!(alloc.allocate(ip("10.1.0.10")), Err(AllocatorError::AlreadyAllocated(ip("10.1.0.10"))));
        assert!(alloc.is_allocated(ip("10.1.0.10")));
        assert_eq!(alloc.allocated(), 1);
        assert_eq!(alloc.free(), 253);
    }

    #[test]
    fn test_allocate_out_of_range() {
        let mut alloc = allocator("10.1.0.0/24");
        for addr in ["10.1.0.0", "10.1.0.255", "10.1.1.1", "9.255.255.255"] {
            assert!(
                matches!(alloc.allocate(ip(addr)), Err(AllocatorError::OutOfRange { .. })),
                "{} should be out of range",
                addr
            );
        }
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_release_then_allocate_again() {
        let mut alloc = allocator("10.1.0.0/24");
        let a = alloc.allocate_next().unwrap();
        let b = alloc.allocate_next().unwrap();

        assert!(alloc.release(a));
        assert!(!alloc.is_allocated(a));
        alloc.allocate(a).unwrap();

        assert!(alloc.release(a));
        assert_eq!(alloc.allocate_next().unwrap(), a, "Lowest free address is reused first");
        assert!(alloc.is_allocated(b));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut alloc = allocator("10.1.0.0/24");
        let a = alloc.allocate_next().unwrap();

        assert!(alloc.release(a));
        assert!(!alloc.release(a));
        assert!(!alloc.release(ip("192.168.0.1")));
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn test_no_duplicates_across_word_boundary() {
        let mut alloc = allocator("10.2.0.0/23");
        let mut seen = std::collections::HashSet::new();
        while let Ok(addr) = alloc.allocate_next() {
            assert!(seen.insert(addr), "{} handed out twice", addr);
        }
        assert_eq!(seen.len(), 510);
        assert_eq!(alloc.free(), 0);
    }

    #[test]
    fn test_point_to_point_subnets() {
        let mut alloc = allocator("10.3.0.0/31");
        assert_eq!(alloc.allocate_next().unwrap(), ip("10.3.0.0"));
        assert_eq!(alloc.allocate_next().unwrap(), ip("10.3.0.1"));
        assert!(alloc.allocate_next().is_err());

        let mut host = allocator("10.3.0.9/32");
        host.allocate(ip("10.3.0.9")).unwrap();
        assert!(host.allocate_next().is_err());
    }
}
