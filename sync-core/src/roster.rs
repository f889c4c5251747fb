//! Roster cache: every user except the viewer, sorted by display name.

use sync_types::{PushAction, UserId, UserProfile};

/// Name-sorted list of the other users.
#[derive(Debug, Clone)]
pub struct Roster {
    me: UserId,
    users: Vec<UserProfile>,
}

impl Roster {
    /// Empty roster for `me`.
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            users: Vec::new(),
        }
    }

    /// Replace the contents. Self and duplicate ids are dropped.
    pub fn load<I>(&mut self, users: I)
    where
        I: IntoIterator<Item = UserProfile>,
    {
        self.users.clear();
        for user in users {
            self.apply_create(user);
        }
    }

    /// Insert a new user in name order. Returns false for self or duplicates.
    pub fn apply_create(&mut self, user: UserProfile) -> bool {
        if user.id == self.me || self.position(&user.id).is_some() {
            return false;
        }
        self.insert_sorted(user);
        true
    }

    /// Patch a user in place, moving it if its name changed.
    ///
    /// An update for an unknown user inserts it.
    pub fn apply_update(&mut self, user: UserProfile) -> bool {
        if user.id == self.me {
            return false;
        }
        match self.position(&user.id) {
            Some(idx) if self.users[idx] == user => false,
            Some(idx) if self.users[idx].display_name() == user.display_name() => {
                self.users[idx] = user;
                true
            }
            Some(idx) => {
                self.users.remove(idx);
                self.insert_sorted(user);
                true
            }
            None => {
                self.insert_sorted(user);
                true
            }
        }
    }

    /// Remove a user. Returns false if absent.
    pub fn apply_delete(&mut self, id: &UserId) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.users.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Dispatch a push action. Returns true when the roster changed.
    pub fn apply(&mut self, action: PushAction, user: UserProfile) -> bool {
        match action {
            PushAction::Create => self.apply_create(user),
            PushAction::Update => self.apply_update(user),
            PushAction::Delete => self.apply_delete(&user.id),
        }
    }

    /// Look up a user.
    pub fn get(&self, id: &UserId) -> Option<&UserProfile> {
        self.position(id).map(|idx| &self.users[idx])
    }

    /// Users in roster order.
    pub fn users(&self) -> &[UserProfile] {
        &self.users
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True when nobody else is known.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    fn position(&self, id: &UserId) -> Option<usize> {
        self.users.iter().position(|u| &u.id == id)
    }

    fn insert_sorted(&mut self, user: UserProfile) {
        let idx = self
            .users
            .binary_search_by(|probe| probe.roster_cmp(&user))
            .unwrap_or_else(|idx| idx);
        self.users.insert(idx, user);
    }
}
