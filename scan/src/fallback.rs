//! Fixed fallback passages used when the generative path cannot produce a verse.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::candidates::ExclusionList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackVerse {
    pub reference: &'static str,
    pub text: &'static str,
    pub encouragement: &'static str,
}

pub const FALLBACK_POOL: [FallbackVerse; 5] = [
    FallbackVerse {
        reference: "Philippians 4:6-7",
        text: "Do not be anxious about anything, but in everything by prayer and supplication with thanksgiving let your requests be made known to God.",
        encouragement: "God invites you to bring today's stress to Him. Take a pause, breathe, and ask for His peace.",
    },
    FallbackVerse {
        reference: "Isaiah 41:10",
        text: "Fear not, for I am with you; be not dismayed, for I am your God; I will strengthen you, I will help you, I will uphold you with my righteous right hand.",
        encouragement: "You are not facing today alone. Lean on God's strength and let Him hold you steady.",
    },
    FallbackVerse {
        reference: "Psalm 55:22",
        text: "Cast your burden on the Lord, and he will sustain you; he will never permit the righteous to be moved.",
        encouragement: "Lay every burden down in prayer and trust that God will carry what feels too heavy.",
    },
    FallbackVerse {
        reference: "Matthew 11:28-29",
        text: "Come to me, all who labor and are heavy laden, and I will give you rest. Take my yoke upon you, and learn from me, for I am gentle and lowly in heart, and you will find rest for your souls.",
        encouragement: "When your schedule feels relentless, rest in Jesus. He is gentle and ready to refresh your soul.",
    },
    FallbackVerse {
        reference: "2 Timothy 1:7",
        text: "For God gave us a spirit not of fear but of power and love and self-control.",
        encouragement: "Step into today with courage; God equips you with a spirit of power, love, and a clear mind.",
    },
];

/// Pick one passage outside the exclusion list. If every passage is
/// excluded the whole pool is used instead.
pub fn pick<R: Rng + ?Sized>(exclusions: &ExclusionList, rng: &mut R) -> FallbackVerse {
    let allowed = exclusions.filter(FALLBACK_POOL.to_vec(), |v| v.reference);
    let pool: &[FallbackVerse] = if allowed.is_empty() {
        &FALLBACK_POOL
    } else {
        &allowed
    };
    pool.choose(rng).copied().unwrap_or(FALLBACK_POOL[0])
}
