//! Namespace and Part Plan Property Tests
//!
//! Randomized checks over many generated inputs.

#[cfg(test)]
mod tests {
    use kura_uploadr::namespace::{relativize, qualify, TenantNamespace};
    use kura_uploadr::upload::PartPlan;
    use rand::Rng;

    const ALPHABET: &[u8] = b"abcxyz0129-_ ";

    fn random_path(rng: &mut impl Rng) -> String {
        let segments = rng.random_range(1..=5);
        let mut path = (0..segments)
            .map(|_| {
                let len = rng.random_range(1..=8);
                (0..len)
                    .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("/");
        if rng.random_bool(0.2) {
            path.push('/');
        }
        path
    }

    #[test]
    fn test_qualify_and_relativize_are_inverse() {
        let mut rng = rand::rng();
        let namespace = TenantNamespace::new("org-7f3a").unwrap();

        for _ in 0..500 {
            let path = random_path(&mut rng);
            let key = qualify(&path, &namespace).unwrap();
            assert!(key.starts_with("org-7f3a/"), "{}", key);
            assert_eq!(relativize(&key, &namespace).unwrap(), path);
            assert_eq!(qualify(&relativize(&key, &namespace).unwrap(), &namespace).unwrap(), key);
        }
    }

    #[test]
    fn test_other_tenants_never_relativize() {
        let mut rng = rand::rng();
        let mine = TenantNamespace::new("org-7f3a").unwrap();
        let theirs = TenantNamespace::new("org-7f3ab").unwrap();

        for _ in 0..200 {
            let key = qualify(&random_path(&mut rng), &theirs).unwrap();
            assert!(relativize(&key, &mine).is_err(), "{}", key);
            assert!(!mine.owns(&key));
        }
    }

    #[test]
    fn test_plan_ranges_cover_source_exactly() {
        let mut rng = rand::rng();

        for _ in 0..500 {
            let part_size = rng.random_range(1..=4096u64);
            let total_size = rng.random_range(1..=part_size * 50);
            let plan = PartPlan::new(total_size, part_size).unwrap();

            assert_eq!(u64::from(plan.total_parts()), total_size.div_ceil(part_size));

            let mut next = 0;
            for (index, task) in plan.tasks().enumerate() {
                assert_eq!(task.part_number, index as u32 + 1);
                assert_eq!(task.range.start, next);
                assert!(task.len() <= part_size);
                if task.part_number < plan.total_parts() {
                    assert_eq!(task.len(), part_size);
                }
                next = task.range.end;
            }
            assert_eq!(next, total_size);
        }
    }
}
