// src/matching/blocking.rs
//
// Candidate generation without a full cross product. Five independent blocks
// each propose pairs; a pair only needs one block to be scored.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

use crate::matching::prepared::PreparedListing;
use crate::matching::similarity::relative_gap;
use crate::utils::dedup_config::DedupConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockingKey {
    CityState,
    ZipCode,
    AskingPrice,
    BusinessName,
    TitleTokens,
}

impl BlockingKey {
    pub const ALL: [BlockingKey; 5] = [
        BlockingKey::CityState,
        BlockingKey::ZipCode,
        BlockingKey::AskingPrice,
        BlockingKey::BusinessName,
        BlockingKey::TitleTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockingKey::CityState => "city_state",
            BlockingKey::ZipCode => "zip_code",
            BlockingKey::AskingPrice => "asking_price",
            BlockingKey::BusinessName => "business_name",
            BlockingKey::TitleTokens => "title_tokens",
        }
    }

    fn index(&self) -> usize {
        match self {
            BlockingKey::CityState => 0,
            BlockingKey::ZipCode => 1,
            BlockingKey::AskingPrice => 2,
            BlockingKey::BusinessName => 3,
            BlockingKey::TitleTokens => 4,
        }
    }

    fn bit(&self) -> u8 {
        1 << self.index()
    }
}

/// Union of all blocks: canonical `(lower index, higher index)` pairs and the blocks that produced them.
#[derive(Debug, Clone, Default)]
pub struct CandidatePairs {
    pairs: BTreeMap<(usize, usize), u8>,
    generated_per_block: [usize; 5],
    truncated_buckets: usize,
}

impl CandidatePairs {
    fn insert(&mut self, a: usize, b: usize, key: BlockingKey) {
        if a == b {
            return;
        }
        let pair = if a < b { (a, b) } else { (b, a) };
        *self.pairs.entry(pair).or_insert(0) |= key.bit();
        self.generated_per_block[key.index()] += 1;
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, a: usize, b: usize) -> bool {
        self.pairs.contains_key(&(a.min(b), a.max(b)))
    }

    /// Blocks that proposed the pair, empty if it was never proposed.
    pub fn blocks_for(&self, a: usize, b: usize) -> Vec<BlockingKey> {
        let mask = self
            .pairs
            .get(&(a.min(b), a.max(b)))
            .copied()
            .unwrap_or(0);
        BlockingKey::ALL
            .iter()
            .copied()
            .filter(|key| mask & key.bit() != 0)
            .collect()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pairs.keys().copied()
    }

    /// Pairs a block generated before the union (duplicates across blocks counted per block).
    pub fn generated_by(&self, key: BlockingKey) -> usize {
        self.generated_per_block[key.index()]
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, usize) -> bool,
    {
        self.pairs.retain(|&(a, b), _| keep(a, b));
    }

    pub fn log_summary(&self) {
        info!("=== Blocking Summary ===");
        for key in BlockingKey::ALL {
            info!("  {:>14}: {} pairs", key.as_str(), self.generated_by(key));
        }
        info!(
            "  Unique candidate pairs: {} ({} oversized buckets capped)",
            self.len(),
            self.truncated_buckets
        );
    }
}

/// Builds the union of all five blocks over `listings`.
pub fn build_candidate_pairs(listings: &[PreparedListing<'_>], config: &DedupConfig) -> CandidatePairs {
    let mut candidates = CandidatePairs::default();

    block_by_key(&mut candidates, listings, config, BlockingKey::CityState, |l| {
        if l.city.is_empty() || l.state.is_empty() {
            None
        } else {
            Some(format!("{}|{}", l.city, l.state))
        }
    });
    block_by_key(&mut candidates, listings, config, BlockingKey::ZipCode, |l| {
        if l.zip.is_empty() {
            None
        } else {
            Some(l.zip.clone())
        }
    });
    block_by_price(&mut candidates, listings, config);
    block_by_key(&mut candidates, listings, config, BlockingKey::BusinessName, |l| {
        if l.business_name.chars().count() < config.min_business_name_len {
            None
        } else {
            Some(l.business_name.clone())
        }
    });
    block_by_title_tokens(&mut candidates, listings, config);

    debug!(
        "Blocking produced {} unique pairs from {} listings",
        candidates.len(),
        listings.len()
    );
    candidates
}

/// Exact-key block: all pairs within each bucket, bucket truncated to `max_block_size`.
fn block_by_key<F>(
    candidates: &mut CandidatePairs,
    listings: &[PreparedListing<'_>],
    config: &DedupConfig,
    key: BlockingKey,
    key_fn: F,
) where
    F: Fn(&PreparedListing<'_>) -> Option<String>,
{
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, listing) in listings.iter().enumerate() {
        if let Some(k) = key_fn(listing) {
            buckets.entry(k).or_default().push(idx);
        }
    }

    for (bucket_key, mut members) in buckets {
        if members.len() < 2 {
            continue;
        }
        if members.len() > config.max_block_size {
            debug!(
                "[{}] Bucket '{}' has {} members, capping at {}",
                key.as_str(),
                bucket_key,
                members.len(),
                config.max_block_size
            );
            members.truncate(config.max_block_size);
            candidates.truncated_buckets += 1;
        }
        for (pos, &a) in members.iter().enumerate() {
            for &b in &members[pos + 1..] {
                candidates.insert(a, b, key);
            }
        }
    }
}

/// Sorted-neighbor scan over asking prices. The relative gap grows monotonically
/// as the scan moves to higher prices, so the scan stops at the first neighbor
/// beyond tolerance.
fn block_by_price(candidates: &mut CandidatePairs, listings: &[PreparedListing<'_>], config: &DedupConfig) {
    let mut priced: Vec<(f64, usize)> = listings
        .iter()
        .enumerate()
        .filter_map(|(idx, l)| l.asking_price().map(|p| (p, idx)))
        .collect();
    priced.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for (pos, &(price, idx)) in priced.iter().enumerate() {
        let mut neighbors = 0usize;
        for &(other_price, other_idx) in &priced[pos + 1..] {
            if relative_gap(price, other_price) > config.price_block_tolerance {
                break;
            }
            if neighbors + 1 >= config.max_block_size {
                candidates.truncated_buckets += 1;
                break;
            }
            candidates.insert(idx, other_idx, BlockingKey::AskingPrice);
            neighbors += 1;
        }
    }
}

/// Inverted index over significant title tokens; pairs need at least
/// `min_shared_title_tokens` tokens in common. Each token's postings are capped
/// at the first `max_block_size` listings like any other bucket.
fn block_by_title_tokens(
    candidates: &mut CandidatePairs,
    listings: &[PreparedListing<'_>],
    config: &DedupConfig,
) {
    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, listing) in listings.iter().enumerate() {
        for token in &listing.title_tokens {
            index.entry(token.as_str()).or_default().push(idx);
        }
    }

    // Postings are built in index order, so truncation keeps the first listings.
    for (token, postings) in index.iter_mut() {
        if postings.len() > config.max_block_size {
            debug!(
                "[{}] Token '{}' has {} postings, capping at {}",
                BlockingKey::TitleTokens.as_str(),
                token,
                postings.len(),
                config.max_block_size
            );
            postings.truncate(config.max_block_size);
            candidates.truncated_buckets += 1;
        }
    }

    for (idx, listing) in listings.iter().enumerate() {
        if listing.title_tokens.len() < config.min_shared_title_tokens {
            continue;
        }
        let mut shared: HashMap<usize, usize> = HashMap::new();
        for token in &listing.title_tokens {
            let Some(postings) = index.get(token.as_str()) else {
                continue;
            };
            for &other in postings {
                if other > idx {
                    *shared.entry(other).or_insert(0) += 1;
                }
            }
        }
        for (other, count) in shared {
            if count >= config.min_shared_title_tokens {
                candidates.insert(idx, other, BlockingKey::TitleTokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::prepared::prepare_all;
    use crate::models::core::ListingRecord;

    fn listing(id: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            ..Default::default()
        }
    }

    fn denver_pair() -> Vec<ListingRecord> {
        vec![
            ListingRecord {
                title: Some("Denver Electrical Co for Sale".to_string()),
                city: Some("Denver".to_string()),
                state: Some("CO".to_string()),
                asking_price: Some(500_000.0),
                ..listing("a")
            },
            ListingRecord {
                title: Some("Denver Electrical Company — For Sale".to_string()),
                city: Some("denver".to_string()),
                state: Some("co".to_string()),
                asking_price: Some(510_000.0),
                ..listing("b")
            },
        ]
    }

    #[test]
    fn test_blocking_completeness_city_state_and_price() {
        let records = denver_pair();
        let prepared = prepare_all(&records);
        let pairs = build_candidate_pairs(&prepared, &DedupConfig::default());

        assert!(pairs.contains(0, 1));
        let blocks = pairs.blocks_for(0, 1);
        assert!(blocks.contains(&BlockingKey::CityState));
        assert!(blocks.contains(&BlockingKey::AskingPrice));
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_non_match_is_never_blocked() {
        let records = vec![
            ListingRecord {
                title: Some("Established Coffee Roastery".to_string()),
                city: Some("Portland".to_string()),
                state: Some("OR".to_string()),
                zip_code: Some("97201".to_string()),
                asking_price: Some(50_000.0),
                business_name: Some("Bean There".to_string()),
                ..listing("a")
            },
            ListingRecord {
                title: Some("Commercial Trucking Fleet".to_string()),
                city: Some("Houston".to_string()),
                state: Some("TX".to_string()),
                zip_code: Some("77002".to_string()),
                asking_price: Some(5_000_000.0),
                business_name: Some("Lone Star Freight".to_string()),
                ..listing("b")
            },
        ];
        let prepared = prepare_all(&records);
        let pairs = build_candidate_pairs(&prepared, &DedupConfig::default());
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_zip_and_business_name_blocks() {
        let records = vec![
            ListingRecord {
                zip_code: Some("80202-1111".to_string()),
                business_name: Some("Mile High Plumbing LLC".to_string()),
                ..listing("a")
            },
            ListingRecord {
                zip_code: Some("80202".to_string()),
                ..listing("b")
            },
            ListingRecord {
                business_name: Some("Mile High Plumbing, Inc.".to_string()),
                ..listing("c")
            },
            ListingRecord {
                business_name: Some("AB Co".to_string()),
                ..listing("d")
            },
            ListingRecord {
                business_name: Some("AB LLC".to_string()),
                ..listing("e")
            },
        ];
        let prepared = prepare_all(&records);
        let pairs = build_candidate_pairs(&prepared, &DedupConfig::default());

        assert_eq!(pairs.blocks_for(0, 1), vec![BlockingKey::ZipCode]);
        assert_eq!(pairs.blocks_for(0, 2), vec![BlockingKey::BusinessName]);
        // "ab" is shorter than the minimum business-name length.
        assert!(!pairs.contains(3, 4));
    }

    #[test]
    fn test_title_token_block_needs_three_shared_tokens() {
        let records = vec![
            ListingRecord {
                title: Some("Profitable Landscaping Company Colorado Springs".to_string()),
                ..listing("a")
            },
            ListingRecord {
                title: Some("Landscaping Company in Colorado Springs".to_string()),
                ..listing("b")
            },
            ListingRecord {
                title: Some("Landscaping Franchise Colorado".to_string()),
                ..listing("c")
            },
        ];
        let prepared = prepare_all(&records);
        let pairs = build_candidate_pairs(&prepared, &DedupConfig::default());

        assert_eq!(pairs.blocks_for(0, 1), vec![BlockingKey::TitleTokens]);
        assert!(!pairs.contains(0, 2));
        assert!(!pairs.contains(1, 2));
    }

    #[test]
    fn test_price_scan_stops_at_first_gap_beyond_tolerance() {
        // Sorted prices: 100k, 105k, 109k, 125k, 126k.
        let prices = [125_000.0, 100_000.0, 109_000.0, 105_000.0, 126_000.0];
        let records: Vec<ListingRecord> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| ListingRecord {
                asking_price: Some(*p),
                ..listing(&format!("l{}", i))
            })
            .collect();
        let prepared = prepare_all(&records);
        let config = DedupConfig::default();
        let pairs = build_candidate_pairs(&prepared, &config);

        // The early-break scan must agree with a brute-force check of every pair.
        for i in 0..prices.len() {
            for j in (i + 1)..prices.len() {
                let within = relative_gap(prices[i], prices[j]) <= config.price_block_tolerance;
                assert_eq!(pairs.contains(i, j), within, "prices {} / {}", prices[i], prices[j]);
            }
        }
    }

    #[test]
    fn test_bucket_cap_limits_generated_pairs() {
        let records: Vec<ListingRecord> = (0..10)
            .map(|i| ListingRecord {
                zip_code: Some("80202".to_string()),
                ..listing(&format!("l{:02}", i))
            })
            .collect();
        let prepared = prepare_all(&records);
        let config = DedupConfig {
            max_block_size: 4,
            ..Default::default()
        };
        let pairs = build_candidate_pairs(&prepared, &config);

        // C(4, 2) pairs from the first four members only.
        assert_eq!(pairs.generated_by(BlockingKey::ZipCode), 6);
        assert_eq!(pairs.len(), 6);
        assert!(!pairs.contains(0, 9));
    }

    #[test]
    fn test_common_title_token_still_counts_inside_its_cap() {
        let mut records = vec![
            ListingRecord {
                title: Some("Pizza Franchise Aurora".to_string()),
                ..listing("a")
            },
            ListingRecord {
                title: Some("Pizza Franchise Aurora".to_string()),
                ..listing("b")
            },
        ];
        records.extend((0..99).map(|i| ListingRecord {
            title: Some(format!("Pizza Kitchen Number{:02}", i)),
            ..listing(&format!("p{:02}", i))
        }));
        let prepared = prepare_all(&records);
        let config = DedupConfig::default();
        assert_eq!(config.max_block_size, 100);
        let pairs = build_candidate_pairs(&prepared, &config);

        // "pizza" has 101 postings; a and b are within the first 100.
        assert!(pairs.contains(0, 1));
        assert!(pairs.blocks_for(0, 1).contains(&BlockingKey::TitleTokens));
    }

    #[test]
    fn test_title_postings_beyond_cap_generate_nothing() {
        let records: Vec<ListingRecord> = (0..5)
            .map(|i| ListingRecord {
                title: Some("Bakery Cafe Boulder".to_string()),
                ..listing(&format!("l{}", i))
            })
            .collect();
        let prepared = prepare_all(&records);
        let config = DedupConfig {
            max_block_size: 3,
            ..Default::default()
        };
        let pairs = build_candidate_pairs(&prepared, &config);

        assert_eq!(pairs.generated_by(BlockingKey::TitleTokens), 3);
        assert!(pairs.contains(0, 2));
        assert!(!pairs.contains(0, 3));
        assert!(!pairs.contains(3, 4));
    }

    #[test]
    fn test_missing_prices_are_not_price_blocked() {
        let records = vec![
            ListingRecord {
                asking_price: Some(0.0),
                ..listing("a")
            },
            ListingRecord {
                asking_price: Some(0.0),
                ..listing("b")
            },
            listing("c"),
        ];
        let prepared = prepare_all(&records);
        let pairs = build_candidate_pairs(&prepared, &DedupConfig::default());
        assert!(pairs.is_empty());
    }
}
