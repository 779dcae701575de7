//! Retention classification of base backups

use tracing::{info, warn};

use super::catalog::{Backup, BackupSet};
use crate::error::{KeeperError, KeeperResult};

/// Which backups stay and which go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: BackupSet,
    pub discard: BackupSet,
    /// Requested number of sane backups
    pub retain: usize,
}

impl RetentionDecision {
    /// Sane backups in the keep set
    pub fn sane_kept(&self) -> usize {
        self.keep.iter().filter(|b| b.sane).count()
    }

    /// How many sane backups are missing to meet `retain`
    pub fn shortfall(&self) -> usize {
        self.retain.saturating_sub(self.sane_kept())
    }
}

/// Split `backups` into the `retain` newest (keep) and everything older
/// (discard)
///
/// Insane backups in the keep set stay there but don't count toward
/// `retain`; fewer sane backups than `retain` is logged, not an error.
pub fn classify(backups: &BackupSet, retain: usize) -> KeeperResult<RetentionDecision> {
    if retain == 0 {
        return Err(KeeperError::Retention(
            "retain must be greater than 0".into(),
        ));
    }

    // Oldest first, so the keep set is the tail
    let mut discard: Vec<Backup> = backups.iter().cloned().collect();
    let keep = discard.split_off(discard.len().saturating_sub(retain));

    for backup in keep.iter().filter(|b| !b.sane) {
        warn!(backup = %backup.name, "insane backup does not count toward retention");
    }

    let decision = RetentionDecision {
        keep: BackupSet::new(keep),
        discard: BackupSet::new(discard),
        retain,
    };

    if decision.shortfall() > 0 {
        warn!(
            retain,
            sane = decision.sane_kept(),
            "Not enough backups for retention policy"
        );
    }
    info!(
        keep = decision.keep.len(),
        discard = decision.discard.len(),
        "classified backups"
    );

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::catalog::parse_backup_name;
    use crate::wal::WalName;

    fn backup(day: u32, sane: bool) -> Backup {
        let name = format!("backup@2024-01-{:02}T00:00:00", day);
        Backup {
            created_at: parse_backup_name(&name).unwrap(),
            name,
            size: 10,
            has_data: true,
            has_metadata: sane,
            start_wal: sane.then(|| WalName::parse("000000010000000000000001").unwrap()),
            sane,
        }
    }

    fn set(specs: &[(u32, bool)]) -> BackupSet {
        specs.iter().map(|&(day, sane)| backup(day, sane)).collect()
    }

    fn days(set: &BackupSet) -> Vec<u32> {
        set.iter()
            .map(|b| b.name[15..17].parse().unwrap())
            .collect()
    }

    #[test]
    fn test_retain_zero_is_rejected() {
        let backups = set(&[(1, true)]);
        assert!(matches!(
            classify(&backups, 0),
            Err(KeeperError::Retention(_))
        ));
    }

    #[test]
    fn test_keeps_newest() {
        let backups = set(&[(1, true), (2, true), (3, true)]);
        let decision = classify(&backups, 2).unwrap();

        assert_eq!(days(&decision.keep), vec![2, 3]);
        assert_eq!(days(&decision.discard), vec![1]);
        assert_eq!(decision.shortfall(), 0);
    }

    #[test]
    fn test_fewer_backups_than_retain() {
        let backups = set(&[(1, true), (2, true)]);
        let decision = classify(&backups, 5).unwrap();

        assert_eq!(decision.keep.len(), 2);
        assert!(decision.discard.is_empty());
        assert_eq!(decision.shortfall(), 3);
    }

    #[test]
    fn test_insane_backups_do_not_count() {
        let backups = set(&[(1, true), (2, true), (3, false), (4, true), (5, false)]);
        let decision = classify(&backups, 2).unwrap();

        assert_eq!(days(&decision.keep), vec![4, 5]);
        assert_eq!(days(&decision.discard), vec![1, 2, 3]);
        assert_eq!(decision.sane_kept(), 1);
        assert_eq!(decision.shortfall(), 1);
    }

    #[test]
    fn test_insane_newest_backup_does_not_extend_keep_set() {
        let backups = set(&[(1, true), (2, true), (3, false)]);
        let decision = classify(&backups, 2).unwrap();

        assert_eq!(days(&decision.keep), vec![2, 3]);
        assert_eq!(days(&decision.discard), vec![1]);
        assert_eq!(decision.shortfall(), 1);
    }

    #[test]
    fn test_old_insane_backups_are_discarded() {
        let backups = set(&[(1, false), (2, true), (3, true)]);
        let decision = classify(&backups, 1).unwrap();

        assert_eq!(days(&decision.keep), vec![3]);
        assert_eq!(days(&decision.discard), vec![1, 2]);
    }

    #[test]
    fn test_partition_properties() {
        let backups = set(&[
            (1, true),
            (2, false),
            (3, true),
            (4, true),
            (5, false),
            (6, true),
        ]);

        for retain in 1..=8 {
            let decision = classify(&backups, retain).unwrap();

            assert_eq!(decision.keep.len() + decision.discard.len(), backups.len());
            assert_eq!(decision.keep.len(), retain.min(backups.len()));
            for b in decision.discard.iter() {
                assert!(!decision.keep.contains(&b.name));
                for kept in decision.keep.iter() {
                    assert!(b.created_at < kept.created_at);
                }
            }
        }
    }
}
