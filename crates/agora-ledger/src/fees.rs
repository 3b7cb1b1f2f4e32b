//! Pure fee computation.
//!
//! Three fee kinds, all configurable, all rounded up to the next cent:
//! the base marketplace fee (percent of agreed price, split 50/50 with the
//! odd cent on the client's side), the verification compute fee (per
//! CPU-second with a floor) and the deliverable storage fee (per KB with a
//! floor).

use agora_core::config::FeeConfig;
use agora_core::Credits;

/// An itemized fee charged for one action. The `detail` string travels into
/// error messages and audit metadata.
#[derive(Debug, Clone)]
pub struct FeeBreakdown {
    pub fee_kind: &'static str,
    pub amount: Credits,
    pub detail: String,
}

/// Fee for one verification run, priced by CPU time consumed. Declarative
/// suites finish in milliseconds, so the configured floor usually applies.
pub fn verification_fee(cfg: &FeeConfig, cpu_millis: u64) -> FeeBreakdown {
    let micro = cfg.verification_per_cpu_second_micro as u128 * cpu_millis as u128 / 1_000;
    let computed = Credits::from_micro_ceil(micro);
    let amount = computed.max(cfg.verification_minimum);
    FeeBreakdown {
        fee_kind: "verification",
        amount,
        detail: format!(
            "Verification compute: {:.1}s (min {} applies)",
            cpu_millis as f64 / 1_000.0,
            cfg.verification_minimum,
        ),
    }
}

/// Fee for storing a deliverable, priced by serialized size.
pub fn storage_fee(cfg: &FeeConfig, size_bytes: u64) -> FeeBreakdown {
    let micro = cfg.storage_per_kb_micro as u128 * size_bytes as u128 / 1_024;
    let computed = Credits::from_micro_ceil(micro);
    let amount = computed.max(cfg.storage_minimum);
    FeeBreakdown {
        fee_kind: "storage",
        amount,
        detail: format!(
            "Deliverable storage: {size_bytes} bytes ({:.1} KB, min {} applies)",
            size_bytes as f64 / 1_024.0,
            cfg.storage_minimum,
        ),
    }
}

/// The base marketplace fee split between the parties. The total is rounded
/// up to a cent; the seller's half is the floor of the split so any odd cent
/// lands on the client's share.
///
/// Returns `(client_fee, seller_fee)`.
pub fn base_fee_split(cfg: &FeeConfig, agreed_price: Credits) -> (FeeBreakdown, FeeBreakdown) {
    let total = agreed_price.percent_bps_ceil(cfg.base_bps);
    let seller_share = Credits::from_cents(total.cents() / 2);
    let client_share = Credits::from_cents(total.cents() - seller_share.cents());
    (
        FeeBreakdown {
            fee_kind: "base_client",
            amount: client_share,
            detail: format!("Marketplace fee (client share) on {agreed_price}"),
        },
        FeeBreakdown {
            fee_kind: "base_seller",
            amount: seller_share,
            detail: format!("Marketplace fee (seller share) on {agreed_price}"),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FeeConfig {
        FeeConfig::default()
    }

    #[test]
    fn verification_floor_applies_to_fast_runs() {
        // 12 ms of declarative checks compute to well under the 0.05 floor.
        let fee = verification_fee(&cfg(), 12);
        assert_eq!(fee.amount, Credits::from_cents(5));
    }

    #[test]
    fn verification_scales_with_cpu_time() {
        // 30 s at 0.01/s = 0.30.
        let fee = verification_fee(&cfg(), 30_000);
        assert_eq!(fee.amount, Credits::from_cents(30));
    }

    #[test]
    fn verification_partial_second_rounds_up() {
        // 6.5 s at 0.01/s = 0.065 → 0.07.
        let fee = verification_fee(&cfg(), 6_500);
        assert_eq!(fee.amount, Credits::from_cents(7));
    }

    #[test]
    fn storage_floor_applies_to_tiny_deliverables() {
        let fee = storage_fee(&cfg(), 100);
        assert_eq!(fee.amount, Credits::from_cents(1));
    }

    #[test]
    fn storage_scales_with_size() {
        // 50 KB at 0.001/KB = 0.05.
        let fee = storage_fee(&cfg(), 50 * 1_024);
        assert_eq!(fee.amount, Credits::from_cents(5));
    }

    #[test]
    fn base_split_is_even_for_even_totals() {
        // 1% of 28.00 = 0.28 → 0.14 / 0.14.
        let (client, seller) = base_fee_split(&cfg(), Credits::from_cents(2_800));
        assert_eq!(client.amount, Credits::from_cents(14));
        assert_eq!(seller.amount, Credits::from_cents(14));
    }

    #[test]
    fn odd_cent_lands_on_client() {
        // 1% of 25.00 = 0.25 → seller 0.12, client 0.13.
        let (client, seller) = base_fee_split(&cfg(), Credits::from_cents(2_500));
        assert_eq!(seller.amount, Credits::from_cents(12));
        assert_eq!(client.amount, Credits::from_cents(13));
        assert_eq!(
            client.amount.checked_add(seller.amount).unwrap(),
            Credits::from_cents(25)
        );
    }
}
