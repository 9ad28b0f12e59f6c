//! Net balances and minimal-transfer debt settlement.
//!
//! The computation is pure: it takes `(payer, amount)` pairs and returns the
//! transfers that equalize everyone's spend. Persistence lives in
//! `ops::settlement`.
//!
//! Ordering is fixed: members, debtors and creditors are always visited in
//! ascending user id, so the same bills always produce the same transfer list.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{EngineError, Money, ResultEngine};

/// How much a member paid against how much they should have paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemberBalance {
    pub user_id: i64,
    pub spent: Money,
    /// The member's per-head share of the group total.
    pub share: Money,
}

impl MemberBalance {
    /// Positive: the member is owed money. Negative: the member owes money.
    pub fn net(&self) -> Money {
        self.spent - self.share
    }
}

/// A transfer computed by [`settle`], not yet persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub amount: Money,
}

/// Aggregates payments per member and assigns each member a per-head share.
///
/// The total is split into whole cents: every member owes `total / n`, and
/// the `total % n` leftover cents go one each to the members with the lowest
/// user ids. Shares therefore sum to the total exactly, and no share is more
/// than one cent away from the real-valued per-head amount.
pub fn member_balances<I>(payments: I) -> ResultEngine<Vec<MemberBalance>>
where
    I: IntoIterator<Item = (i64, Money)>,
{
    let mut spend: BTreeMap<i64, Money> = BTreeMap::new();
    let mut total = Money::ZERO;
    for (user_id, amount) in payments {
        if amount.is_negative() {
            return Err(EngineError::Invalid(
                "paid amount must not be negative".to_string(),
            ));
        }
        let overflow = || EngineError::Invalid("group total too large".to_string());
        let entry = spend.entry(user_id).or_insert(Money::ZERO);
        *entry = entry.checked_add(amount).ok_or_else(overflow)?;
        total = total.checked_add(amount).ok_or_else(overflow)?;
    }

    if spend.is_empty() {
        return Err(EngineError::Invalid(
            "no members to split between".to_string(),
        ));
    }

    let members = spend.len() as i64;
    let base = total.cents() / members;
    let leftover = total.cents() % members;

    Ok(spend
        .into_iter()
        .zip(0_i64..)
        .map(|((user_id, spent), position)| MemberBalance {
            user_id,
            spent,
            share: Money::new(base + i64::from(position < leftover)),
        })
        .collect())
}

/// Greedily matches debtors with creditors.
///
/// Each step moves `min(remaining due, remaining credit)` and retires at least
/// one side, so the result has at most `debtors + creditors - 1` transfers,
/// every amount is strictly positive and nobody pays themselves.
pub fn settle(balances: &[MemberBalance]) -> Vec<Settlement> {
    let mut sorted = balances.to_vec();
    sorted.sort_by_key(|balance| balance.user_id);

    let mut debtors: Vec<(i64, Money)> = Vec::new();
    let mut creditors: Vec<(i64, Money)> = Vec::new();
    for balance in &sorted {
        let net = balance.net();
        if net.is_negative() {
            debtors.push((balance.user_id, -net));
        } else if net.is_positive() {
            creditors.push((balance.user_id, net));
        }
    }

    let mut transfers = Vec::with_capacity((debtors.len() + creditors.len()).saturating_sub(1));
    let (mut d, mut c) = (0, 0);
    while d < debtors.len() && c < creditors.len() {
        let (debtor_id, due) = debtors[d];
        let (creditor_id, credit) = creditors[c];
        let amount = due.min(credit);

        if amount.is_positive() {
            transfers.push(Settlement {
                from_user_id: debtor_id,
                to_user_id: creditor_id,
                amount,
            });
        }

        debtors[d].1 -= amount;
        creditors[c].1 -= amount;
        if !debtors[d].1.is_positive() {
            d += 1;
        }
        if !creditors[c].1.is_positive() {
            c += 1;
        }
    }

    transfers
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    fn m(cents: i64) -> Money {
        Money::new(cents)
    }

    fn run(payments: &[(i64, i64)]) -> (Vec<MemberBalance>, Vec<Settlement>) {
        let balances = member_balances(payments.iter().map(|&(u, c)| (u, m(c)))).unwrap();
        let transfers = settle(&balances);
        (balances, transfers)
    }

    /// Checks every structural property a settlement must satisfy.
    fn assert_well_formed(balances: &[MemberBalance], transfers: &[Settlement]) {
        let total: Money = balances.iter().map(|b| b.spent).sum();
        let shares: Money = balances.iter().map(|b| b.share).sum();
        assert_eq!(total, shares, "shares must add up to the total");

        let members = balances.len() as i64;
        for balance in balances {
            let skew = balance.share.cents() * members - total.cents();
            assert!(skew.abs() < members, "share off by a cent or more");
        }

        let deficit: Money = balances
            .iter()
            .filter(|b| b.net().is_negative())
            .map(|b| -b.net())
            .sum();
        let surplus: Money = balances
            .iter()
            .filter(|b| b.net().is_positive())
            .map(|b| b.net())
            .sum();
        assert_eq!(deficit, surplus);

        let moved: Money = transfers.iter().map(|t| t.amount).sum();
        assert_eq!(moved, deficit);

        let debtors = balances.iter().filter(|b| b.net().is_negative()).count();
        let creditors = balances.iter().filter(|b| b.net().is_positive()).count();
        assert!(transfers.len() <= (debtors + creditors).saturating_sub(1));

        let mut flow: HashMap<i64, Money> = HashMap::new();
        for transfer in transfers {
            assert_ne!(transfer.from_user_id, transfer.to_user_id);
            assert!(transfer.amount.is_positive());
            *flow.entry(transfer.from_user_id).or_default() -= transfer.amount;
            *flow.entry(transfer.to_user_id).or_default() += transfer.amount;
        }
        for balance in balances {
            let received = flow.get(&balance.user_id).copied().unwrap_or_default();
            assert_eq!(received, balance.net(), "user {}", balance.user_id);
        }
    }

    #[test]
    fn three_members_ninety_thirty_zero() {
        let (balances, transfers) = run(&[(1, 90_00), (2, 30_00), (3, 0)]);

        assert!(balances.iter().all(|b| b.share == m(40_00)));
        assert_eq!(
            transfers,
            vec![
                Settlement {
                    from_user_id: 2,
                    to_user_id: 1,
                    amount: m(10_00),
                },
                Settlement {
                    from_user_id: 3,
                    to_user_id: 1,
                    amount: m(40_00),
                },
            ]
        );
        assert_well_formed(&balances, &transfers);
    }

    #[test]
    fn aggregates_multiple_bills_per_member() {
        let (balances, transfers) = run(&[(7, 10_00), (9, 5_00), (7, 20_00), (9, 5_00)]);

        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].spent, m(30_00));
        assert_eq!(balances[1].spent, m(10_00));
        assert_eq!(
            transfers,
            vec![Settlement {
                from_user_id: 9,
                to_user_id: 7,
                amount: m(10_00),
            }]
        );
    }

    #[test]
    fn leftover_cents_go_to_lowest_user_ids() {
        let (balances, transfers) = run(&[(3, 100), (1, 0), (2, 0)]);

        let shares: Vec<_> = balances.iter().map(|b| (b.user_id, b.share)).collect();
        assert_eq!(shares, vec![(1, m(34)), (2, m(33)), (3, m(33))]);
        assert_eq!(
            transfers,
            vec![
                Settlement {
                    from_user_id: 1,
                    to_user_id: 3,
                    amount: m(34),
                },
                Settlement {
                    from_user_id: 2,
                    to_user_id: 3,
                    amount: m(33),
                },
            ]
        );
        assert_well_formed(&balances, &transfers);
    }

    #[test]
    fn balanced_group_needs_no_transfers() {
        let (balances, transfers) = run(&[(1, 25_00), (2, 25_00)]);
        assert!(transfers.is_empty());
        assert_well_formed(&balances, &transfers);

        let (_, transfers) = run(&[(1, 0), (2, 0)]);
        assert!(transfers.is_empty());
    }

    #[test]
    fn single_member_owes_nobody() {
        let (balances, transfers) = run(&[(5, 12_34)]);
        assert_eq!(balances[0].net(), Money::ZERO);
        assert!(transfers.is_empty());
    }

    #[test]
    fn creditor_spread_across_several_debtors() {
        let (balances, transfers) = run(&[(1, 0), (2, 0), (3, 0), (4, 100_00), (5, 50_00)]);
        assert_well_formed(&balances, &transfers);
        assert_eq!(transfers.len(), 4);
        assert_eq!(transfers[0].to_user_id, 4);
    }

    proptest! {
        #[test]
        fn settle_properties(
            payments in prop::collection::vec((1i64..=8, 0i64..100_000), 1..20)
        ) {
            let (balances, transfers) = run(&payments);
            assert_well_formed(&balances, &transfers);
            prop_assert_eq!(settle(&balances), transfers);
        }
    }

    #[test]
    fn rejects_negative_payments() {
        let err = member_balances([(1, m(10)), (2, m(-1))]).unwrap_err();
        assert_eq!(
            err,
            EngineError::Invalid("paid amount must not be negative".to_string())
        );
    }

    #[test]
    fn rejects_empty_input() {
        let err = member_balances(Vec::new()).unwrap_err();
        assert_eq!(
            err,
            EngineError::Invalid("no members to split between".to_string())
        );
    }

    #[test]
    fn rejects_overflowing_totals() {
        let err = member_balances([(1, m(i64::MAX)), (2, m(1))]).unwrap_err();
        assert_eq!(err, EngineError::Invalid("group total too large".to_string()));
    }
}
