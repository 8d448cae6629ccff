use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{RoomId, Timestamp, UserId};

const MAX_GROUP_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Private => "private",
            RoomKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private" => Some(RoomKind::Private),
            "group" => Some(RoomKind::Group),
            _ => None,
        }
    }
}

/// 会话房间：私聊（恰好两人）或群聊（群主 + 经理 + 普通成员）。
///
/// `members` 保持加入顺序，群聊的第一个成员总是创建者。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRoom {
    pub id: RoomId,
    pub kind: RoomKind,
    pub members: Vec<UserId>,
    pub name: Option<String>,
    pub admin: Option<UserId>,
    pub managers: Vec<UserId>,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl ConversationRoom {
    pub fn new_private(
        id: RoomId,
        user_a: UserId,
        user_b: UserId,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if user_a == user_b {
            return Err(DomainError::invalid_input(
                "members",
                "a private room needs two distinct users",
            ));
        }
        Ok(Self {
            id,
            kind: RoomKind::Private,
            members: vec![user_a, user_b],
            name: None,
            admin: None,
            managers: Vec::new(),
            created_at: now,
            last_activity_at: now,
        })
    }

    /// 创建群聊：成员去重并剔除创建者，再把创建者放在首位。
    pub fn new_group(
        id: RoomId,
        creator: UserId,
        name: impl Into<String>,
        member_ids: impl IntoIterator<Item = UserId>,
        now: Timestamp,
    ) -> DomainResult<Self> {
        let name = validate_group_name(name.into())?;

        let mut members = vec![creator];
        for member in member_ids {
            if !members.contains(&member) {
                members.push(member);
            }
        }
        if members.len() < 2 {
            return Err(DomainError::invalid_input(
                "memberIds",
                "at least one member besides the creator is required",
            ));
        }

        Ok(Self {
            id,
            kind: RoomKind::Group,
            members,
            name: Some(name),
            admin: Some(creator),
            managers: vec![creator],
            created_at: now,
            last_activity_at: now,
        })
    }

    pub fn is_group(&self) -> bool {
        self.kind == RoomKind::Group
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin == Some(user_id)
    }

    /// 群主隐式拥有经理权限。
    pub fn is_manager(&self, user_id: UserId) -> bool {
        self.is_admin(user_id) || self.managers.contains(&user_id)
    }

    /// 私聊双方按 id 排序后的二元组，用作唯一性键。
    pub fn private_pair(&self) -> Option<(UserId, UserId)> {
        match (self.kind, self.members.as_slice()) {
            (RoomKind::Private, [a, b]) => Some(pair_key(*a, *b)),
            _ => None,
        }
    }

    pub fn ensure_member(&self, user_id: UserId, action: &str) -> DomainResult<()> {
        if self.is_member(user_id) {
            Ok(())
        } else {
            Err(DomainError::unauthorized(action))
        }
    }

    /// 返回实际新增的成员，已在群内的 id 被静默忽略。
    pub fn add_members(
        &mut self,
        acting: UserId,
        new_members: impl IntoIterator<Item = UserId>,
        require_manager: bool,
    ) -> DomainResult<Vec<UserId>> {
        self.ensure_member(acting, "add members")?;
        self.ensure_group("add members")?;
        if require_manager && !self.is_manager(acting) {
            return Err(DomainError::unauthorized("add members"));
        }

        let mut added = Vec::new();
        for member in new_members {
            if !self.members.contains(&member) {
                self.members.push(member);
                added.push(member);
            }
        }
        Ok(added)
    }

    pub fn remove_member(&mut self, acting: UserId, target: UserId) -> DomainResult<()> {
        self.ensure_member(acting, "remove member")?;
        self.ensure_group("remove member")?;
        if !self.is_member(target) {
            return Err(DomainError::NotAMember);
        }

        if acting == target {
            if self.is_admin(acting) {
                return Err(DomainError::AdminCannotLeave);
            }
        } else {
            if !self.is_manager(acting) {
                return Err(DomainError::unauthorized("remove member"));
            }
            if self.is_admin(target) {
                return Err(DomainError::unauthorized("remove the group admin"));
            }
        }

        self.members.retain(|member| *member != target);
        self.managers.retain(|manager| *manager != target);
        Ok(())
    }

    pub fn promote_manager(&mut self, acting: UserId, target: UserId) -> DomainResult<()> {
        self.ensure_group("promote manager")?;
        if !self.is_admin(acting) {
            return Err(DomainError::unauthorized("promote manager"));
        }
        if !self.is_member(target) {
            return Err(DomainError::NotAMember);
        }
        if self.is_manager(target) {
            return Err(DomainError::conflict("user is already a manager"));
        }
        self.managers.push(target);
        Ok(())
    }

    pub fn demote_manager(&mut self, acting: UserId, target: UserId) -> DomainResult<()> {
        self.ensure_group("demote manager")?;
        if !self.is_admin(acting) {
            return Err(DomainError::unauthorized("demote manager"));
        }
        if self.is_admin(target) {
            return Err(DomainError::invalid_operation(
                "the group admin cannot be demoted",
            ));
        }
        if !self.is_member(target) {
            return Err(DomainError::NotAMember);
        }
        if !self.managers.contains(&target) {
            return Err(DomainError::invalid_operation("user is not a manager"));
        }
        self.managers.retain(|manager| *manager != target);
        Ok(())
    }

    pub fn rename(&mut self, acting: UserId, name: impl Into<String>) -> DomainResult<()> {
        self.ensure_group("rename")?;
        if !self.is_manager(acting) {
            return Err(DomainError::unauthorized("rename group"));
        }
        self.name = Some(validate_group_name(name.into())?);
        Ok(())
    }

    /// 群聊只有群主可以解散，私聊任一成员都可以删除。
    pub fn authorize_delete(&self, acting: UserId) -> DomainResult<()> {
        let allowed = match self.kind {
            RoomKind::Group => self.is_admin(acting),
            RoomKind::Private => self.is_member(acting),
        };
        if allowed {
            Ok(())
        } else {
            Err(DomainError::unauthorized("delete room"))
        }
    }

    pub fn touch(&mut self, at: Timestamp) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }

    fn ensure_group(&self, action: &str) -> DomainResult<()> {
        if self.is_group() {
            Ok(())
        } else {
            Err(DomainError::invalid_operation(format!(
                "{action} is only available in group rooms"
            )))
        }
    }
}

pub fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn validate_group_name(name: String) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_input("name", "cannot be empty"));
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_CHARS {
        return Err(DomainError::invalid_input("name", "too long"));
    }
    Ok(trimmed.to_owned())
}
