//! Maps scenario tags to a session requirement

/// Which stored session, if any, a scenario needs before it executes.
/// Resolved once per scenario from its tag set and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequirement {
    None,
    User,
    Profile,
}

const NONE_TAGS: &[&str] = &["@session:none", "@sem-sessao", "@no-session", "@sessao:none"];
const USER_TAGS: &[&str] = &["@session:user", "@perfil:pendente", "@session:usuario"];
const PROFILE_TAGS: &[&str] = &["@session:profile", "@profile:required", "@perfil:selecionado"];

fn matches_any(tags: &[String], set: &[&str]) -> bool {
    tags.iter()
        .any(|tag| set.contains(&tag.to_lowercase().as_str()))
}

/// Resolve a scenario's tag set to its session requirement.
///
/// Tags are compared case-insensitively, in precedence order
/// none > user > profile. Unrecognized or absent tags resolve to
/// `Profile`: most scenarios exercise an authenticated profile, so the
/// strictest requirement is the safe default.
pub fn resolve(tags: &[String]) -> SessionRequirement {
    if matches_any(tags, NONE_TAGS) {
        return SessionRequirement::None;
    }
    if matches_any(tags, USER_TAGS) {
        return SessionRequirement::User;
    }
    if matches_any(tags, PROFILE_TAGS) {
        return SessionRequirement::Profile;
    }
    SessionRequirement::Profile
}
