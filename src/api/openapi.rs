use super::handlers::{agent, auth, health, supervisor};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Handlers sharing a path go
/// into the same `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    let tags = [
        ("health", "Service and store health"),
        ("auth", "Signup, login, password reset and sessions"),
        ("agent", "The authenticated agent's own record"),
        ("supervisor", "Subagent management for supervisors"),
    ]
    .into_iter()
    .map(|(name, description)| {
        let mut tag = Tag::new(name);
        tag.description = Some(description.to_string());
        tag
    })
    .collect();

    let mut openapi = cargo_openapi();
    openapi.tags = Some(tags);

    let router = OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(auth::signup))
        .routes(routes!(auth::signup_confirm))
        .routes(routes!(auth::login))
        .routes(routes!(auth::login_confirm))
        .routes(routes!(auth::resend_code))
        .routes(routes!(auth::password_reset))
        .routes(routes!(auth::password_reset_confirm))
        .routes(routes!(auth::session))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::logout_all))
        .routes(routes!(agent::me, agent::update_me))
        .routes(routes!(agent::assign_electoral_area))
        .routes(routes!(agent::electoral_area_choices))
        .routes(routes!(agent::electoral_areas))
        .routes(routes!(agent::subagent_me))
        .routes(routes!(
            supervisor::add_sub_agents,
            supervisor::list_sub_agents
        ))
        .routes(routes!(
            supervisor::get_sub_agent,
            supervisor::deactivate_sub_agent
        ))
        .routes(routes!(supervisor::issue_sub_agent_code));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author<'a>(author: &'a str) -> (Option<&'a str>, Option<&'a str>) {
    let non_empty = |value: &'a str| {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    };
    match author.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
