use ipnet::IpNet;
use radij_core::errors::Error;
use radij_core::helpers::net_key;
use radij_core::{AddOutcome, KeyedTrie, TrieConfig};
use std::collections::HashSet;

const M8: [u8; 5] = [5, 255, 0, 0, 0];
const M16: [u8; 5] = [5, 255, 255, 0, 0];
const HOST: [u8; 5] = [5, 255, 255, 255, 255];

fn best(trie: &KeyedTrie<u32>, key: &[u8]) -> Option<u32> {
    trie.longest_match(key).map(|m| *m.value)
}

#[test]
fn host_entries_match_exactly() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    trie.add_route(&[5, 10, 0, 0, 2], None, 2).unwrap();
    trie.verify().unwrap();

    assert_eq!(best(&trie, &[5, 10, 0, 0, 1]), Some(1));
    assert_eq!(best(&trie, &[5, 10, 0, 0, 2]), Some(2));
    assert_eq!(best(&trie, &[5, 10, 0, 0, 3]), None);
    assert_eq!(trie.len(), 2);
}

#[test]
fn masked_entry_covers_its_network() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 10).unwrap();

    let m = trie.longest_match(&[5, 10, 7, 7, 7]).unwrap();
    assert_eq!(*m.value, 10);
    assert_eq!(m.key, &[5, 10, 0, 0, 0]);
    assert_eq!(m.mask, Some(&M8[..]));
    assert_eq!(best(&trie, &[5, 11, 7, 7, 7]), None);
    trie.verify().unwrap();
}

#[test]
fn same_key_with_several_masks_and_duplicates() {
    let mut trie = KeyedTrie::with_defaults();
    let key = [5, 10, 0, 0, 0];
    trie.add_route(&key, Some(&M8), 8).unwrap();
    trie.add_route(&key, Some(&M16), 16).unwrap();
    assert_eq!(trie.add_route(&key, Some(&M8), 99), Err(Error::AlreadyExists));
    trie.verify().unwrap();

    // chain order is most specific first
    let order: Vec<u32> = trie.iter().map(|m| *m.value).collect();
    assert_eq!(order, vec![16, 8]);

    assert_eq!(best(&trie, &[5, 10, 0, 7, 7]), Some(16));
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), Some(8));
    assert_eq!(trie.mask_count(), 2);
}

#[test]
fn host_entry_leads_the_chain_and_its_removal_keeps_the_net() {
    let mut trie = KeyedTrie::with_defaults();
    let key = [5, 10, 0, 0, 0];
    trie.add_route(&key, Some(&M8), 8).unwrap();
    trie.add_route(&key, None, 1).unwrap();
    trie.verify().unwrap();

    let order: Vec<Option<&[u8]>> = trie.iter().map(|m| m.mask).collect();
    assert_eq!(order, vec![None, Some(&M8[..])]);
    assert_eq!(best(&trie, &key), Some(1));

    let removed = trie.delete(&key, None).unwrap();
    assert_eq!(removed.value, 1);
    assert_eq!(removed.mask, None);
    trie.verify().unwrap();

    assert_eq!(best(&trie, &key), Some(8));
    assert_eq!(best(&trie, &[5, 10, 9, 9, 9]), Some(8));
}

#[test]
fn walk_counts_entries_and_tolerates_deleting_the_visited_one() {
    let mut trie = KeyedTrie::with_defaults();
    let keys: [[u8; 5]; 5] = [
        [5, 30, 0, 0, 1],
        [5, 10, 0, 0, 1],
        [5, 200, 1, 2, 3],
        [5, 10, 0, 0, 2],
        [5, 0, 0, 0, 9],
    ];
    for (i, k) in keys.iter().enumerate() {
        trie.add_route(k, None, i as u32).unwrap();
    }

    let mut visits = 0;
    trie.walk(|_, _| -> Result<(), Error> {
        visits += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(visits, 5);

    let mut seen = Vec::new();
    trie.walk(|t, id| -> Result<(), Error> {
        let value = *t.get(id).unwrap().value;
        seen.push(value);
        if value == 3 {
            t.remove(id)?;
        }
        Ok(())
    })
    .unwrap();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert_eq!(trie.len(), 4);
    assert_eq!(best(&trie, &[5, 10, 0, 0, 2]), None);
    trie.verify().unwrap();

    let mut again = 0;
    trie.walk(|_, _| -> Result<(), Error> {
        again += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(again, 4);
}

#[test]
fn walk_visits_in_key_order_and_stops_on_error() {
    let mut trie = KeyedTrie::with_defaults();
    for k in [0x40u8, 0x10, 0x30, 0x20] {
        trie.add_route(&[2, k], None, k as u32).unwrap();
    }
    let in_order: Vec<u32> = trie.iter().map(|m| *m.value).collect();
    assert_eq!(in_order, vec![0x10, 0x20, 0x30, 0x40]);

    let mut visited = 0;
    let res = trie.walk(|t, id| {
        visited += 1;
        if *t.get(id).unwrap().value == 0x20 {
            return Err(Error::NotFound);
        }
        Ok(())
    });
    assert_eq!(res, Err(Error::NotFound));
    assert_eq!(visited, 2);
}

#[test]
fn walk_reports_a_successor_removed_by_the_visitor() {
    let mut trie = KeyedTrie::with_defaults();
    for k in [0x10u8, 0x20, 0x30] {
        trie.add_route(&[2, k], None, k as u32).unwrap();
    }

    let mut seen = Vec::new();
    let res = trie.walk(|t, id| -> Result<(), Error> {
        let value = *t.get(id).unwrap().value;
        seen.push(value);
        if value == 0x10 {
            // the next leaf in key order, not the one being visited
            t.delete(&[2, 0x20], None)?;
        }
        Ok(())
    });
    assert!(matches!(res, Err(Error::InvariantViolation(_))));
    assert_eq!(seen, vec![0x10]);
    assert_eq!(trie.len(), 2);
    trie.verify().unwrap();
    assert_eq!(best(&trie, &[2, 0x30]), Some(0x30));
}

#[test]
fn short_mask_does_not_hide_longer_ancestor_masks() {
    let mut trie = KeyedTrie::with_defaults();
    // covers every key whose last byte is zero
    trie.add_route(&[5, 0, 0, 0, 0], Some(&[5, 0, 0, 0, 0xff]), 1).unwrap();
    // a two-byte mask: only the second byte counts
    trie.add_route(&[5, 0, 0, 0, 0x10], Some(&[2, 0xff]), 2).unwrap();
    trie.verify().unwrap();

    assert_eq!(best(&trie, &[5, 0, 0, 0, 0x10]), Some(2));
    assert_eq!(best(&trie, &[5, 0, 9, 9, 0x77]), Some(2));
    assert_eq!(best(&trie, &[5, 11, 7, 7, 0]), Some(1));
    // second byte rules out the short mask, last byte the long one
    assert_eq!(best(&trie, &[5, 11, 0, 0, 0x10]), None);
    assert_eq!(best(&trie, &[5, 0xff, 1, 1, 0x10]), None);
}

#[test]
fn hundred_random_keys_in_and_out() {
    let mut trie = KeyedTrie::with_defaults();
    let mut uniq = HashSet::new();
    while uniq.len() < 100 {
        uniq.insert(rand::random::<[u8; 4]>());
    }
    let keys: Vec<[u8; 5]> = uniq
        .into_iter()
        .map(|b| [5, b[0], b[1], b[2], b[3]])
        .collect();
    for (i, k) in keys.iter().enumerate() {
        trie.add_route(k, None, i as u32).unwrap();
    }
    assert_eq!(trie.len(), 100);
    trie.verify().unwrap();

    for (i, k) in keys.iter().enumerate().rev() {
        let hit = trie.lookup(k).expect("present before delete");
        assert_eq!(hit.key, &k[..]);
        assert_eq!(*hit.value, i as u32);
        assert_eq!(best(&trie, k), Some(i as u32));
        assert_eq!(trie.delete(k, None).unwrap().value, i as u32);
    }
    assert!(trie.is_empty());
    assert_eq!(trie.iter().count(), 0);
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    trie.verify().unwrap();
}

#[test]
fn zero_length_key_round_trips() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[1], None, 42).unwrap();
    trie.verify().unwrap();
    assert_eq!(best(&trie, &[1]), Some(42));
    assert_eq!(trie.lookup(&[1]).map(|m| *m.value), Some(42));
    assert_eq!(trie.iter().count(), 1);

    assert_eq!(trie.delete(&[1], None).unwrap().value, 42);
    assert!(trie.is_empty());
    trie.verify().unwrap();
    // only the sentinel is left where the key used to be
    assert!(matches!(
        trie.delete(&[1], None),
        Err(Error::InvariantViolation(_))
    ));
}

#[test]
fn keys_differing_in_the_last_bit() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[3, 0x40, 0x00], None, 0).unwrap();
    trie.add_route(&[3, 0x40, 0x01], None, 1).unwrap();
    trie.verify().unwrap();
    assert!(trie.dump().iter().any(|l| l.contains(" b=23 ")));
    assert_eq!(best(&trie, &[3, 0x40, 0x00]), Some(0));
    assert_eq!(best(&trie, &[3, 0x40, 0x01]), Some(1));
}

#[test]
fn host_masks_are_never_lifted() {
    for host_first in [true, false] {
        let mut trie = KeyedTrie::with_defaults();
        if host_first {
            trie.add_route(&[5, 10, 0, 0, 1], Some(&HOST), 1).unwrap();
            trie.add_route(&[5, 10, 0, 0, 2], None, 2).unwrap();
        } else {
            trie.add_route(&[5, 10, 0, 0, 2], None, 2).unwrap();
            trie.add_route(&[5, 10, 0, 0, 1], Some(&HOST), 1).unwrap();
        }
        trie.verify().unwrap();
        assert_eq!(trie.mask_descriptors_in_use(), 0);
        assert_eq!(best(&trie, &[5, 10, 0, 0, 1]), Some(1));
    }
}

#[test]
fn promoted_descriptor_goes_away_with_its_route() {
    // net first: its mask is promoted when the host splits the leaf
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    assert_eq!(trie.mask_descriptors_in_use(), 1);
    trie.verify().unwrap();
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), Some(8));

    let removed = trie.delete(&[5, 10, 0, 0, 1], None).unwrap();
    assert_eq!(removed.orphaned_masks, 0);
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    trie.verify().unwrap();
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), Some(8));

    // host first: the net's mask climbs onto the shared parent
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();
    assert_eq!(trie.mask_descriptors_in_use(), 1);
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), Some(8));
    assert_eq!(best(&trie, &[5, 11, 0, 0, 0]), None);

    let removed = trie.delete(&[5, 10, 0, 0, 0], Some(&M8)).unwrap();
    assert_eq!(removed.value, 8);
    assert_eq!(removed.mask.as_deref(), Some(&M8[..]));
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), None);
    trie.verify().unwrap();
}

#[test]
fn shared_descriptor_survives_until_last_user() {
    // keys with host bits under one /8 climb to the same node
    let mut trie = KeyedTrie::with_defaults();
    for last in 1..=3u8 {
        trie.add_route(&[5, 10, 0, 0, last], Some(&M8), last as u32).unwrap();
        trie.verify().unwrap();
    }
    assert_eq!(trie.mask_descriptors_in_use(), 1);
    assert_eq!(best(&trie, &[5, 10, 9, 9, 9]), Some(1));
    assert_eq!(best(&trie, &[5, 10, 9, 9, 3]), Some(3));

    trie.delete(&[5, 10, 0, 0, 1], Some(&M8)).unwrap();
    trie.verify().unwrap();
    assert_eq!(trie.mask_descriptors_in_use(), 1);
    assert_eq!(best(&trie, &[5, 10, 9, 9, 9]), Some(3));

    trie.delete(&[5, 10, 0, 0, 2], Some(&M8)).unwrap();
    trie.verify().unwrap();
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    assert_eq!(best(&trie, &[5, 10, 9, 9, 9]), Some(3));
}

#[test]
fn default_route_catches_everything_else() {
    let zero = [5, 0, 0, 0, 0];
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&zero, Some(&zero), 0).unwrap();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 10).unwrap();
    trie.verify().unwrap();

    assert_eq!(best(&trie, &[5, 10, 1, 1, 1]), Some(10));
    assert_eq!(best(&trie, &[5, 20, 1, 1, 1]), Some(0));
    assert_eq!(best(&trie, &[5, 200, 1, 1, 1]), Some(0));
    assert_eq!(best(&trie, &zero), Some(0));

    trie.delete(&zero, Some(&zero)).unwrap();
    trie.verify().unwrap();
    assert_eq!(best(&trie, &[5, 200, 1, 1, 1]), None);
    assert_eq!(trie.mask_descriptors_in_use(), 0);
}

#[test]
fn failed_descriptor_allocation_is_reported_not_rolled_back() {
    let config = TrieConfig::default().with_mask_descriptor_capacity(0);
    let mut trie = KeyedTrie::new(config).unwrap();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    let outcome = trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();
    assert!(matches!(outcome, AddOutcome::MaskNotEntered(_)));
    assert!(!outcome.is_complete());

    assert_eq!(trie.len(), 2);
    assert_eq!(trie.get(outcome.id()).map(|m| *m.value), Some(8));
    // reachable from its own leaf only
    assert_eq!(best(&trie, &[5, 10, 0, 0, 0]), Some(8));
    assert_eq!(best(&trie, &[5, 10, 7, 7, 7]), None);
    trie.verify().unwrap();

    trie.delete(&[5, 10, 0, 0, 0], Some(&M8)).unwrap();
    trie.verify().unwrap();
}

#[test]
fn capacities_fail_before_anything_changes() {
    let mut trie = KeyedTrie::new(TrieConfig::default().with_node_capacity(2)).unwrap();
    trie.add_route(&[5, 1, 0, 0, 0], None, 1).unwrap();
    assert_eq!(trie.add_route(&[5, 2, 0, 0, 0], None, 2), Err(Error::OutOfMemory));
    assert_eq!(
        trie.add_route(&[5, 1, 0, 0, 0], Some(&M8), 3),
        Err(Error::OutOfMemory)
    );
    assert_eq!(trie.len(), 1);
    trie.verify().unwrap();

    let mut trie = KeyedTrie::new(TrieConfig::default().with_mask_table_capacity(1)).unwrap();
    trie.add_route(&[5, 1, 0, 0, 0], Some(&M8), 1).unwrap();
    assert_eq!(
        trie.add_route(&[5, 1, 2, 0, 0], Some(&M16), 2),
        Err(Error::OutOfMemory)
    );
    assert_eq!(trie.len(), 1);
}

#[test]
fn malformed_input_is_rejected() {
    let mut trie = KeyedTrie::with_defaults();
    assert!(matches!(trie.add_route(&[0], None, 1), Err(Error::InvalidKey(_))));
    assert!(matches!(trie.add_route(&[4, 1, 2], None, 1), Err(Error::InvalidKey(_))));
    assert!(matches!(
        trie.add_route(&[3, 1, 2], Some(&[2, 255, 0]), 1),
        Err(Error::InvalidKey(_))
    ));
    assert!(trie.longest_match(&[9, 1]).is_none());
    assert!(trie.is_empty());

    for bad in [
        TrieConfig::default().with_max_keylen(0),
        TrieConfig::default().with_max_keylen(300),
        TrieConfig::default().with_key_offset_bits(320),
    ] {
        assert!(matches!(KeyedTrie::<u32>::new(bad), Err(Error::InvalidConfig(_))));
    }
}

#[test]
fn delete_selects_chain_members_by_mask() {
    let mut trie = KeyedTrie::with_defaults();
    let key = [5, 10, 0, 0, 0];
    trie.add_route(&key, Some(&M8), 8).unwrap();
    trie.add_route(&key, Some(&M16), 16).unwrap();

    assert_eq!(trie.delete(&key, Some(&[5, 255, 255, 255, 0])).err(), Some(Error::NotFound));
    assert_eq!(trie.delete(&key, None).err(), Some(Error::NotFound));
    assert_eq!(trie.delete(&[5, 10, 0, 0, 1], None).err(), Some(Error::NotFound));
    assert_eq!(trie.delete(&key, Some(&M8)).unwrap().value, 8);
    trie.verify().unwrap();

    // a lone entry goes whatever mask is named
    assert_eq!(trie.delete(&key, Some(&M8)).unwrap().value, 16);
    assert!(trie.is_empty());
}

#[test]
fn handles_go_stale_after_removal() {
    let mut trie = KeyedTrie::with_defaults();
    let id = trie.add_route(&[2, 7], None, 7u32).unwrap().id();
    *trie.get_mut(id).unwrap() += 1;
    assert_eq!(trie.get(id).map(|m| *m.value), Some(8));

    assert_eq!(trie.remove(id).unwrap().value, 8);
    assert!(trie.get(id).is_none());
    assert_eq!(trie.remove(id).err(), Some(Error::NotFound));

    let again = trie.add_route(&[2, 7], None, 9).unwrap().id();
    assert_ne!(again, id);
    assert!(trie.get(id).is_none());
}

#[test]
fn clear_empties_everything() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    trie.add_route(&[5, 10, 0, 0, 0], None, 0).unwrap();
    trie.add_route(&[5, 0, 0, 0, 0], Some(&[5, 0, 0, 0, 0]), 100).unwrap();
    assert_eq!(trie.clear(), 4);
    assert!(trie.is_empty());
    assert_eq!(trie.mask_descriptors_in_use(), 0);
    trie.verify().unwrap();
}

#[test]
fn ip_networks_via_net_key() {
    let mut trie = KeyedTrie::with_defaults();
    for (cidr, v) in [("10.0.0.0/8", 8u32), ("10.1.0.0/16", 16), ("10.1.2.0/24", 24)] {
        let (k, m) = net_key(&cidr.parse::<IpNet>().unwrap());
        trie.add_route(&k, Some(m.as_slice()), v).unwrap();
    }
    trie.verify().unwrap();
    let q = |s: &str| net_key(&s.parse::<IpNet>().unwrap()).0;
    assert_eq!(best(&trie, &q("10.1.2.3/32")), Some(24));
    assert_eq!(best(&trie, &q("10.1.9.9/32")), Some(16));
    assert_eq!(best(&trie, &q("10.200.0.1/32")), Some(8));
    assert_eq!(best(&trie, &q("11.0.0.1/32")), None);
}

#[test]
fn dump_lists_every_entry() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    let dump = trie.dump();
    assert!(dump[0].starts_with("* "));
    assert_eq!(dump.iter().filter(|l| l.trim_start().starts_with('@')).count(), 4);
    assert!(dump.iter().any(|l| l.contains("key=050a000000") && l.contains("mask=05ff000000")));
    trie.log_dump();
}

#[test]
fn masked_lookup_ignores_bits_outside_the_mask() {
    let mut trie = KeyedTrie::with_defaults();
    trie.add_route(&[5, 10, 0, 0, 1], None, 1).unwrap();
    trie.add_route(&[5, 10, 0, 0, 0], Some(&M8), 8).unwrap();

    assert_eq!(trie.lookup(&[5, 10, 0, 0, 1]).map(|m| *m.value), Some(1));
    let masked = trie.lookup_masked(&[5, 10, 0, 0, 1], &M8).unwrap();
    assert_eq!(*masked.value, 8);
    assert_eq!(masked.key, &[5, 10, 0, 0, 0]);
}
