use std::sync::atomic::{AtomicI32, Ordering};

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;

/// A named engine parameter. Values are read with an acquire load in the hot
/// path and written with a release store from the option handler, so the
/// search must never assume a value is constant across plies.
pub struct Param {
    pub name: &'static str,
    pub default: i32,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    value: AtomicI32,
}

impl Param {
    pub const fn new(name: &'static str, default: i32, min: i32, max: i32, step: i32) -> Self {
        Self { name, default, min, max, step, value: AtomicI32::new(default) }
    }

    #[inline(always)]
    pub fn val(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, v: i32) {
        self.value.store(v.clamp(self.min, self.max), Ordering::Release);
    }
}

macro_rules! tunables {
    ($($name:ident = $def:literal, $min:literal, $max:literal, $step:literal;)*) => {
        $(pub static $name: Param = Param::new(stringify!($name), $def, $min, $max, $step);)*
        pub static PARAMS: &[&Param] = &[$(&$name,)*];
    };
}

tunables! {
    // Correction history
    PAWN_CORR_WEIGHT = 186, 64, 2048, 32;
    MAJOR_CORR_WEIGHT = 128, 64, 2048, 32;
    MINOR_CORR_WEIGHT = 128, 64, 2048, 32;
    NON_PAWN_STM_CORR_WEIGHT = 128, 64, 2048, 32;
    NON_PAWN_NSTM_CORR_WEIGHT = 128, 64, 2048, 32;
    CORRHIST_BONUS_WEIGHT = 100, 10, 300, 10;

    // History bonus/malus
    HIST_BONUS_QUADRATIC = 7, 1, 10, 1;
    HIST_BONUS_LINEAR = 274, 64, 384, 32;
    HIST_BONUS_OFFSET = 182, 64, 768, 64;
    HIST_MALUS_QUADRATIC = 5, 1, 10, 1;
    HIST_MALUS_LINEAR = 283, 64, 384, 32;
    HIST_MALUS_OFFSET = 169, 64, 768, 64;

    // Pruning
    RFP_MARGIN = 76, 30, 100, 8;
    RFP_MAX_DEPTH = 6, 4, 10, 1;
    RAZORING_SCALE = 300, 100, 500, 25;
    NMP_BASE_REDUCTION = 4, 2, 5, 1;
    NMP_REDUCTION_SCALE = 4, 3, 6, 1;
    NMP_EVAL_SCALE = 210, 50, 300, 10;
    LMP_MIN_MOVES_BASE = 2, 2, 8, 1;
    SEE_PRUNING_SCALAR = -90, -128, -16, 16;
    IIR_MIN_DEPTH = 5, 2, 9, 1;

    // Singular extensions
    SE_MIN_DEPTH = 7, 4, 10, 1;
    SE_BETA_SCALE = 31, 8, 64, 1;
    SE_DOUBLE_MARGIN = 22, 0, 40, 2;

    // Late move reductions
    LMR_BASE_QUIET = 139, -50, 200, 5;
    LMR_DIVISOR_QUIET = 278, 150, 350, 5;
    LMR_BASE_NOISY = 20, -50, 200, 5;
    LMR_DIVISOR_NOISY = 331, 150, 350, 5;
    LMR_MIN_DEPTH = 1, 1, 8, 1;
    LMR_MIN_MOVECOUNT = 4, 1, 10, 1;
    LMR_HIST_DIVISOR = 8192, 4096, 16384, 650;
    LMR_BASE_SCALE = 1024, 256, 2048, 64;
    LMR_DEEPER_BASE = 40, 0, 128, 8;
    LMR_DEEPER_SCALE = 2, 0, 8, 1;

    // Aspiration windows
    MIN_ASP_WINDOW_DEPTH = 4, 3, 8, 1;
    INITIAL_ASP_WINDOW = 37, 8, 64, 4;
    ASP_WIDENING_FACTOR = 3, 1, 32, 2;

    // Exchange values
    PAWN_VALUE = 100, 50, 200, 10;
    KNIGHT_VALUE = 300, 200, 500, 15;
    BISHOP_VALUE = 300, 200, 500, 15;
    ROOK_VALUE = 500, 350, 700, 20;
    QUEEN_VALUE = 900, 650, 1300, 30;
}

pub const LMR_ONE_COUNT: usize = 6;
pub const LMR_TWO_COUNT: usize = 15;
pub const LMR_THREE_COUNT: usize = 20;

macro_rules! atomic_arr {
    ($($v:literal),*) => { [$(AtomicI32::new($v)),*] };
}

/// Factorised interaction weights over the six LMR features
/// (is_quiet, !is_pv, improving, cutnode, tt_pv, tt_hit), in 1024-units.
pub static LMR_ONE_PAIR: [AtomicI32; LMR_ONE_COUNT] = atomic_arr![66, 978, -835, 1797, -818, -155];
pub static LMR_TWO_PAIR: [AtomicI32; LMR_TWO_COUNT] =
    atomic_arr![-84, -175, 88, 166, -53, -234, 220, -24, -31, -21, -198, 38, 9, -160, 353];
pub static LMR_THREE_PAIR: [AtomicI32; LMR_THREE_COUNT] = atomic_arr![
    -181, -108, -143, -189, 187, -180, 158, -10, 228, 123, -47, 142, -116, 162, -57, 207, -286,
    137, -131, 169
];

/// One-, two- and three-way AND interactions between the feature bits,
/// summed with their weights. The result is in the same 1024-unit scale the
/// reduction accumulates in before its final divide.
pub fn lmr_convolution(features: [bool; LMR_ONE_COUNT]) -> i32 {
    let mut output = 0;
    let mut two = 0;
    let mut three = 0;
    for i in 0..LMR_ONE_COUNT {
        output += LMR_ONE_PAIR[i].load(Ordering::Relaxed) * i32::from(features[i]);
        for j in i + 1..LMR_ONE_COUNT {
            output += LMR_TWO_PAIR[two].load(Ordering::Relaxed) * i32::from(features[i] && features[j]);
            for k in j + 1..LMR_ONE_COUNT {
                output += LMR_THREE_PAIR[three].load(Ordering::Relaxed)
                    * i32::from(features[i] && features[j] && features[k]);
                three += 1;
            }
            two += 1;
        }
    }
    output
}

lazy_static! {
    static ref BY_NAME: FxHashMap<&'static str, &'static Param> =
        PARAMS.iter().map(|p| (p.name, *p)).collect();
}

/// Applies a `setoption` value to a named parameter or an indexed LMR
/// interaction weight. Returns false when the name matches nothing.
pub fn set_param(name: &str, value: i32) -> bool {
    if let Some(param) = BY_NAME.get(name) {
        param.set(value);
        return true;
    }
    for (prefix, table) in [
        ("LMR_ONE_PAIR_", &LMR_ONE_PAIR[..]),
        ("LMR_TWO_PAIR_", &LMR_TWO_PAIR[..]),
        ("LMR_THREE_PAIR_", &LMR_THREE_PAIR[..]),
    ] {
        if let Some(idx) = name.strip_prefix(prefix) {
            if let Ok(idx) = idx.parse::<usize>() {
                if let Some(slot) = table.get(idx) {
                    slot.store(value.clamp(-2048, 2048), Ordering::Release);
                    return true;
                }
            }
        }
    }
    false
}

/// OpenBench tuning config, one parameter per line
pub fn print_ob_config() {
    for param in PARAMS {
        println!(
            "{}, int, {}, {}, {}, {}, 0.002",
            param.name, param.default, param.min, param.max, param.step
        );
    }
    for (prefix, table) in [
        ("LMR_ONE_PAIR_", &LMR_ONE_PAIR[..]),
        ("LMR_TWO_PAIR_", &LMR_TWO_PAIR[..]),
        ("LMR_THREE_PAIR_", &LMR_THREE_PAIR[..]),
    ] {
        for (i, w) in table.iter().enumerate() {
            println!("{prefix}{i}, int, {}, -2048, 2048, 200, 0.002", w.load(Ordering::Relaxed));
        }
    }
}
