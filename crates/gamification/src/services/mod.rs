pub mod badges;
pub mod challenges;
pub mod ranking;
pub mod validator;
pub mod xp_award;

pub use badges::{BadgeCatalog, BadgeEngine, starter_badges};
pub use challenges::ChallengeManager;
pub use ranking::{RankingCalculator, SubScores, composite};
pub use validator::{AntiGamingValidator, SuspicionReport, ValidationOutcome, suspicion_score};
pub use xp_award::{AwardRequest, AwardResult, AwardStatus, XpAwardEngine};
