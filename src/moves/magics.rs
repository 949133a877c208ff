use lazy_static::lazy_static;

use crate::moves::attack_boards::{FILES, RANKS};
use crate::moves::moves::Direction::{self, East, North, NorthEast, NorthWest, South, SouthEast, SouthWest, West};
use crate::types::bitboard::Bitboard;
use crate::types::square::Square;

/// Magic slider lookups found at startup with a deterministic xorshift, in
/// the style of the rustic engine's generator.
///
/// Simple xorshift with a fixed seed so every run builds identical tables
pub struct Rng(u64);

impl Default for Rng {
    fn default() -> Self {
        Self(0x9E37_79B9_7F4A_7C15)
    }
}

impl Rng {
    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 21;
        self.0 ^= self.0 >> 35;
        self.0 ^= self.0 << 4;
        self.0
    }

    /// Sparse candidates make better magics
    fn next_magic(&mut self) -> u64 {
        self.next_u64() & self.next_u64() & self.next_u64()
    }
}

const ROOK_TABLE_SIZE: usize = 102_400;
const BISHOP_TABLE_SIZE: usize = 5_248;
const ROOK_DELTAS: [Direction; 4] = [North, South, East, West];
const BISHOP_DELTAS: [Direction; 4] = [NorthEast, NorthWest, SouthEast, SouthWest];

#[derive(Clone, Copy, Default)]
struct MagicEntry {
    mask: Bitboard,
    magic: u64,
    shift: u8,
    offset: usize,
}

pub struct Magics {
    rook_table: Vec<Bitboard>,
    rook_magics: [MagicEntry; 64],
    bishop_table: Vec<Bitboard>,
    bishop_magics: [MagicEntry; 64],
}

lazy_static! {
    static ref MAGICS: Magics = Magics::generate();
}

pub fn rook_attacks(sq: Square, occupied: Bitboard) -> Bitboard {
    let entry = &MAGICS.rook_magics[sq];
    MAGICS.rook_table[table_index(entry, occupied)]
}

pub fn bishop_attacks(sq: Square, occupied: Bitboard) -> Bitboard {
    let entry = &MAGICS.bishop_magics[sq];
    MAGICS.bishop_table[table_index(entry, occupied)]
}

pub fn queen_attacks(sq: Square, occupied: Bitboard) -> Bitboard {
    rook_attacks(sq, occupied) | bishop_attacks(sq, occupied)
}

fn table_index(entry: &MagicEntry, occupied: Bitboard) -> usize {
    let blockers = occupied & entry.mask;
    let hash = blockers.0.wrapping_mul(entry.magic);
    entry.offset + (hash >> entry.shift) as usize
}

impl Magics {
    fn generate() -> Self {
        let mut rng = Rng::default();
        let mut rook_table = Vec::with_capacity(ROOK_TABLE_SIZE);
        let mut rook_magics = [MagicEntry::default(); 64];
        let mut bishop_table = Vec::with_capacity(BISHOP_TABLE_SIZE);
        let mut bishop_magics = [MagicEntry::default(); 64];

        for sq in Square::iter() {
            let (entry, mut table) = find_magic(sq, ROOK_DELTAS, &mut rng, rook_table.len());
            rook_magics[sq] = entry;
            rook_table.append(&mut table);

            let (entry, mut table) = find_magic(sq, BISHOP_DELTAS, &mut rng, bishop_table.len());
            bishop_magics[sq] = entry;
            bishop_table.append(&mut table);
        }

        assert_eq!(ROOK_TABLE_SIZE, rook_table.len());
        assert_eq!(BISHOP_TABLE_SIZE, bishop_table.len());

        Self { rook_table, rook_magics, bishop_table, bishop_magics }
    }
}

fn find_magic(sq: Square, deltas: [Direction; 4], rng: &mut Rng, offset: usize) -> (MagicEntry, Vec<Bitboard>) {
    let edges = (RANKS[0] | RANKS[7]) & !RANKS[sq.rank() as usize]
        | (FILES[0] | FILES[7]) & !FILES[sq.file() as usize];
    let mask = ray_blockers(deltas, sq) & !edges;
    let shift = 64 - mask.count_bits() as u8;
    loop {
        let entry = MagicEntry { mask, magic: rng.next_magic(), shift, offset };
        if let Some(table) = try_fill_table(deltas, sq, &entry) {
            return (entry, table);
        }
    }
}

fn try_fill_table(deltas: [Direction; 4], sq: Square, entry: &MagicEntry) -> Option<Vec<Bitboard>> {
    let bits = 64 - entry.shift;
    let mut table = vec![Bitboard::EMPTY; 1 << bits];
    let mut blockers = Bitboard::EMPTY;
    loop {
        let attacks = sliding_attacks(deltas, sq, blockers);
        let slot = &mut table[table_index(entry, blockers) - entry.offset];
        if *slot == Bitboard::EMPTY {
            *slot = attacks;
        } else if *slot != attacks {
            // Destructive collision, this candidate is no good
            return None;
        }
        // Carry-rippler enumeration of all subsets of the mask
        blockers.0 = blockers.0.wrapping_sub(entry.mask.0) & entry.mask.0;
        if blockers == Bitboard::EMPTY {
            return Some(table);
        }
    }
}

/// Walks each ray until it hits a blocker, which is included
pub(super) fn sliding_attacks(deltas: [Direction; 4], sq: Square, occupied: Bitboard) -> Bitboard {
    let mut attacks = Bitboard::EMPTY;
    for dir in deltas {
        let mut current = sq;
        while let Some(next) = current.checked_shift(dir) {
            attacks |= next.bitboard();
            if occupied.occupied(next) {
                break;
            }
            current = next;
        }
    }
    attacks
}

fn ray_blockers(deltas: [Direction; 4], sq: Square) -> Bitboard {
    let mut rays = Bitboard::EMPTY;
    for dir in deltas {
        let mut current = sq;
        while let Some(next) = current.checked_shift(dir) {
            rays |= next.bitboard();
            current = next;
        }
    }
    rays
}

#[cfg(test)]
mod magic_tests {
    use super::*;

    #[test]
    fn rook_attacks_on_empty_board() {
        let attacks = rook_attacks(Square(0), Bitboard::EMPTY);
        assert_eq!(attacks.count_bits(), 14);
    }

    #[test]
    fn rook_attacks_stop_at_blockers() {
        let occ = Square(8).bitboard() | Square(2).bitboard();
        let attacks = rook_attacks(Square(0), occ);
        assert!(attacks.occupied(Square(8)));
        assert!(attacks.occupied(Square(2)));
        assert!(!attacks.occupied(Square(16)));
        assert!(!attacks.occupied(Square(3)));
    }

    #[test]
    fn bishop_attacks_match_ray_walk() {
        let occ = Bitboard(0x0000_1200_0450_0000);
        for sq in Square::iter() {
            assert_eq!(bishop_attacks(sq, occ), sliding_attacks(BISHOP_DELTAS, sq, occ));
            assert_eq!(rook_attacks(sq, occ), sliding_attacks(ROOK_DELTAS, sq, occ));
        }
    }
}
