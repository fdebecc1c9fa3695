//! 请求状态迁移规则表
//!
//! 每条边规定允许的操作者角色、对承接者字段的影响、是否建立会话，
//! 以及迁移后发给哪一方的通知模板。表外的边一律非法。

use crate::models::{Request, RequestStatus, UserId};
use crate::notification::template::TemplateKey;

use RequestStatus::*;

/// 操作者相对于请求的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Provider,
    /// 既不是发布者也不是当前承接者
    Other,
}

impl Role {
    pub fn of(request: &Request, actor_id: UserId) -> Self {
        Self::resolve(request.creator_id, request.provider_id, actor_id)
    }

    pub fn resolve(creator_id: UserId, provider_id: Option<UserId>, actor_id: UserId) -> Self {
        if actor_id == creator_id {
            Self::Creator
        } else if provider_id == Some(actor_id) {
            Self::Provider
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Provider => "provider",
            Self::Other => "other",
        }
    }
}

/// 迁移对承接者字段的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEffect {
    Keep,
    /// 操作者成为承接者
    SetActor,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub allowed: &'static [Role],
    pub provider: ProviderEffect,
    /// 在发布者与操作者之间建立会话
    pub opens_thread: bool,
}

impl TransitionRule {
    pub fn permits(&self, role: Role) -> bool {
        self.allowed.contains(&role)
    }
}

const fn rule(
    from: RequestStatus,
    to: RequestStatus,
    allowed: &'static [Role],
    provider: ProviderEffect,
    opens_thread: bool,
) -> TransitionRule {
    TransitionRule {
        from,
        to,
        allowed,
        provider,
        opens_thread,
    }
}

pub const RULES: &[TransitionRule] = &[
    rule(Open, Committed, &[Role::Other], ProviderEffect::SetActor, true),
    rule(Committed, Accepted, &[Role::Creator], ProviderEffect::Keep, false),
    rule(Committed, Open, &[Role::Provider, Role::Creator], ProviderEffect::Clear, false),
    rule(Accepted, Received, &[Role::Creator], ProviderEffect::Keep, false),
    rule(Accepted, Delivered, &[Role::Provider], ProviderEffect::Keep, false),
    rule(Accepted, Open, &[Role::Creator], ProviderEffect::Clear, false),
    rule(Received, Completed, &[Role::Creator], ProviderEffect::Keep, false),
    rule(Delivered, Completed, &[Role::Creator], ProviderEffect::Keep, false),
    rule(Open, Removed, &[Role::Creator], ProviderEffect::Clear, false),
    rule(Committed, Removed, &[Role::Creator], ProviderEffect::Clear, false),
];

pub fn find_rule(from: RequestStatus, to: RequestStatus) -> Option<&'static TransitionRule> {
    RULES.iter().find(|r| r.from == from && r.to == to)
}

/// 通知接收方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Creator,
    Provider,
}

/// 一次迁移产生的通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub template: TemplateKey,
    pub recipient: Party,
}

const fn notice(template: TemplateKey, recipient: Party) -> Option<Notice> {
    Some(Notice {
        template,
        recipient,
    })
}

/// 迁移对应的通知，`actor` 仅在 committed → open 上区分撤回与拒绝
pub fn notice_for(from: RequestStatus, to: RequestStatus, actor: Role) -> Option<Notice> {
    match (from, to) {
        (Open, Committed) => notice(TemplateKey::RequestFromOpenToCommitted, Party::Creator),
        (Committed, Accepted) => notice(TemplateKey::RequestFromCommittedToAccepted, Party::Provider),
        (Committed, Open) => match actor {
            Role::Creator => notice(TemplateKey::RequestOfferRejected, Party::Provider),
            _ => notice(TemplateKey::RequestOfferWithdrawn, Party::Creator),
        },
        (Accepted, Received) => notice(TemplateKey::RequestFromAcceptedToReceived, Party::Provider),
        (Accepted, Delivered) => notice(TemplateKey::RequestDelivered, Party::Creator),
        (Accepted, Open) => notice(TemplateKey::RequestFromAcceptedToOpen, Party::Provider),
        (Received | Delivered, Completed) => notice(TemplateKey::RequestCompleted, Party::Provider),
        (Open | Committed, Removed) => notice(TemplateKey::RequestRemoved, Party::Provider),
        _ => None,
    }
}

/// 规则表中所有迁移可能用到的模板
pub fn notice_templates() -> Vec<TemplateKey> {
    let mut keys: Vec<TemplateKey> = RULES
        .iter()
        .flat_map(|r| r.allowed.iter().filter_map(move |role| notice_for(r.from, r.to, *role)))
        .map(|n| n.template)
        .collect();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_edges_leave_terminal_states() {
        for rule in RULES {
            assert!(!rule.from.is_terminal(), "{} is terminal", rule.from);
        }
    }

    #[test]
    fn test_provider_effect_matches_status_invariant() {
        for rule in RULES {
            match rule.provider {
                ProviderEffect::SetActor | ProviderEffect::Keep => {
                    assert!(rule.to.requires_provider(), "{} -> {}", rule.from, rule.to)
                }
                ProviderEffect::Clear => {
                    assert!(!rule.to.requires_provider(), "{} -> {}", rule.from, rule.to)
                }
            }
        }
    }

    #[test]
    fn test_unknown_edges() {
        assert!(find_rule(Open, Accepted).is_none());
        assert!(find_rule(Completed, Open).is_none());
        assert!(find_rule(Delivered, Received).is_none());
        assert!(find_rule(Open, Committed).unwrap().opens_thread);
    }

    #[test]
    fn test_withdraw_and_reject_notify_the_other_party() {
        assert_eq!(
            notice_for(Committed, Open, Role::Provider),
            Some(Notice {
                template: TemplateKey::RequestOfferWithdrawn,
                recipient: Party::Creator
            })
        );
        assert_eq!(
            notice_for(Committed, Open, Role::Creator),
            Some(Notice {
                template: TemplateKey::RequestOfferRejected,
                recipient: Party::Provider
            })
        );
    }

    #[test]
    fn test_every_rule_has_a_notice() {
        for rule in RULES {
            for role in rule.allowed {
                assert!(notice_for(rule.from, rule.to, *role).is_some());
            }
        }
        assert!(notice_templates().contains(&TemplateKey::RequestFromAcceptedToReceived));
        assert!(!notice_templates().contains(&TemplateKey::NewMessage));
    }

    #[test]
    fn test_role_resolution() {
        let creator = UserId(1);
        let provider = UserId(2);
        assert_eq!(Role::resolve(creator, Some(provider), creator), Role::Creator);
        assert_eq!(Role::resolve(creator, Some(provider), provider), Role::Provider);
        assert_eq!(Role::resolve(creator, None, provider), Role::Other);
    }
}
