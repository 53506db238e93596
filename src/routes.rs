use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Form, Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use futures::future;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{
    AppState,
    auth::SignUp,
    backend::{Backend, rest::RestBackend},
    data::{
        comments::{add_comment, delete_comment, edit_comment, get_comment, like_comment, list_comments},
        memberships::{self, TrailerList, fetch_memberships, is_member},
        notifications::{mark_all_read, notifications_for},
        profiles::{self, display_names, profile_or_default, update_username},
        storage,
        trailers::{all_trailers, get_trailer, search_trailers, trailers_in_section},
    },
    error::{AppError, AppResult},
    genre::{Category, categories_of, group_by_category},
    models::{CommentRow, Membership, MembershipKind, Notification, Profile, Requester, Section, synthesized_name},
    resolver,
    session::{self, CurrentUser},
    templates::{
        self, ACTIONS_SELECTOR, ADMIN_RESULT_SELECTOR, COMMENTS_SELECTOR, FLASH_SELECTOR, Nav, ProfileData,
    },
    view::{MovieView, Outcome, ViewRegistry, ViewSlot, optimistic},
};

const SECTION_LIMIT: usize = 24;
const CATALOG_LIMIT: usize = 1000;
const SEARCH_LIMIT: usize = 48;
const NOTIFICATION_LIMIT: usize = 50;
const POSTER_BODY_LIMIT: usize = 6 * 1024 * 1024;
const RESET_NOTICE: &str = "If an account exists for that address, a reset link is on its way.";
const CONFIRM_NOTICE: &str = "Check your email to confirm your account, then sign in.";
const EXPIRED_LINK: &str = "This reset link has expired. Request a new one.";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(login_form).post(login))
        .route("/signup", post(signup))
        .route("/logout", post(logout))
        .route("/forgot-password", get(forgot_password_form).post(forgot_password))
        .route("/reset-password", get(reset_password_form).post(reset_password))
        .route("/account/password", get(password_form).post(change_password))
        .route("/", get(home))
        .route("/search", get(search))
        .route("/categories", get(categories))
        .route("/category/{slug}", get(category))
        .route("/movie/{id}", get(movie))
        .route("/movie/{id}/favorite", post(toggle_favorite))
        .route("/movie/{id}/watchlist", post(toggle_watchlist))
        .route("/movie/{id}/comments", post(post_comment))
        .route("/comments/{id}/like", post(like))
        .route("/comments/{id}/edit", post(edit))
        .route("/comments/{id}/delete", post(delete))
        .route("/profile", get(profile).post(update_profile))
        .route("/notifications/read", post(mark_notifications_read))
        .route("/admin/posters", post(upload_poster).layer(DefaultBodyLimit::max(POSTER_BODY_LIMIT)))
        .route("/admin/trailers/backfill", post(backfill_trailers))
        .layer(middleware::from_fn_with_state(state.clone(), session::refresh_session))
        .with_state(state)
}

fn is_datastar(headers: &HeaderMap) -> bool {
    headers.contains_key("datastar-request")
}

/// HTML that replaces the element matching `selector` in place.
fn fragment(selector: &'static str, body: String) -> Response {
    let mut resp = Html(body).into_response();
    resp.headers_mut().insert("datastar-selector", HeaderValue::from_static(selector));
    resp.headers_mut().insert("datastar-mode", HeaderValue::from_static("outer"));
    resp
}

/// Fragment requests get the error as a flash message; full-page requests
/// get the error page.
fn failure(headers: &HeaderMap, err: AppError) -> Response {
    if matches!(err, AppError::Unauthorized) || !is_datastar(headers) {
        return err.into_response();
    }
    if err.status().is_server_error() {
        error!(error = %err, "request failed");
    }
    fragment(FLASH_SELECTOR, templates::error_fragment(err.user_message()))
}

/// Re-render a form page with the error, keeping the error's status.
fn form_error(err: AppError, render: impl FnOnce(&str) -> String) -> Response {
    if matches!(err, AppError::Unauthorized) {
        return err.into_response();
    }
    let status = err.status();
    if status.is_server_error() {
        warn!(error = %err, "form submission failed");
    }
    (status, Html(render(&err.user_message()))).into_response()
}

fn movie_url(trailer_id: &str) -> String {
    format!("/movie/{}", urlencoding::encode(trailer_id))
}

/// Everything a signed-in page needs besides its own content.
struct PageContext {
    nav: Nav,
    requester: Requester,
    profile: Profile,
    notifications: Vec<Notification>,
}

impl PageContext {
    async fn load(backend: &RestBackend, user: &CurrentUser) -> Self {
        let (profile, notifications) = tokio::join!(
            profile_or_default(backend, &user.id, user.email.as_deref()),
            notifications_for(backend, &user.id, NOTIFICATION_LIMIT),
        );
        let notifications = notifications.unwrap_or_else(|err| {
            warn!(user_id = %user.id, error = %err, "failed to load notifications");
            Vec::new()
        });

        let nav = Nav {
            name: profile.display_name(),
            is_admin: profile.is_admin,
            unread: notifications.iter().filter(|n| !n.read).count(),
        };
        let requester = Requester { id: user.id.clone(), is_admin: profile.is_admin };
        Self { nav, requester, profile, notifications }
    }
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct RecoveryForm {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct RecoveryLink {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentForm {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct UsernameForm {
    #[serde(default)]
    username: String,
}

pub async fn login_form() -> Html<String> {
    Html(templates::login_page(None, None))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<Credentials>,
) -> Response {
    match state.auth.sign_in(&form.email, &form.password).await {
        Ok(session) => {
            info!(user_id = %session.user.id, "signed in");
            (session::store(jar, &session, state.config.secure_cookies), Redirect::to("/")).into_response()
        },
        Err(err) => form_error(err, |msg| templates::login_page(Some(msg), None)),
    }
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<Credentials>,
) -> Response {
    match state.auth.sign_up(&form.email, &form.password).await {
        Ok(SignUp::SignedIn(session)) => {
            info!(user_id = %session.user.id, "signed up");
            (session::store(jar, &session, state.config.secure_cookies), Redirect::to("/")).into_response()
        },
        Ok(SignUp::ConfirmationSent(user)) => {
            info!(user_id = %user.id, "sign-up confirmation sent");
            Html(templates::login_page(None, Some(CONFIRM_NOTICE))).into_response()
        },
        Err(err) => form_error(err, |msg| templates::login_page(Some(msg), None)),
    }
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    user: Result<CurrentUser, AppError>,
) -> Response {
    if let Ok(user) = user {
        state.auth.sign_out(&user.access_token).await;
        state.views.forget(&user.id);
        info!(user_id = %user.id, "signed out");
    }
    (session::clear(jar), Redirect::to("/login")).into_response()
}

pub async fn forgot_password_form() -> Html<String> {
    Html(templates::forgot_password_page(None, None))
}

pub async fn forgot_password(State(state): State<Arc<AppState>>, Form(form): Form<EmailForm>) -> Response {
    match state.auth.reset_password(&form.email).await {
        Ok(()) => Html(templates::forgot_password_page(None, Some(RESET_NOTICE))).into_response(),
        Err(err) => form_error(err, |msg| templates::forgot_password_page(Some(msg), None)),
    }
}

pub async fn reset_password_form(Query(link): Query<RecoveryLink>) -> Html<String> {
    let token = link.access_token.filter(|t| !t.is_empty());
    Html(templates::reset_password_page(token.as_deref(), None))
}

/// Set a new password with the recovery token from a reset email. The token
/// is only used for this call; no session is stored.
pub async fn reset_password(State(state): State<Arc<AppState>>, Form(form): Form<RecoveryForm>) -> Response {
    if form.access_token.is_empty() {
        return Redirect::to("/login").into_response();
    }
    match state.auth.update_password(&form.access_token, &form.password).await {
        Ok(()) => {
            info!("password reset completed");
            Redirect::to("/login").into_response()
        },
        Err(AppError::Unauthorized | AppError::Backend { status: Some(401 | 403), .. }) => {
            (StatusCode::UNAUTHORIZED, Html(templates::forgot_password_page(Some(EXPIRED_LINK), None))).into_response()
        },
        Err(err) => form_error(err, |msg| templates::reset_password_page(Some(&form.access_token), Some(msg))),
    }
}

pub async fn password_form(State(state): State<Arc<AppState>>, user: CurrentUser) -> Html<String> {
    let ctx = PageContext::load(&user.backend(&state), &user).await;
    Html(templates::change_password_page(&ctx.nav, None, None))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<PasswordForm>,
) -> Response {
    let ctx = PageContext::load(&user.backend(&state), &user).await;
    match state.auth.update_password(&user.access_token, &form.password).await {
        Ok(()) => {
            info!(user_id = %user.id, "password changed");
            Html(templates::change_password_page(&ctx.nav, None, Some("Password updated."))).into_response()
        },
        Err(err) => form_error(err, |msg| templates::change_password_page(&ctx.nav, Some(msg), None)),
    }
}

pub async fn home(State(state): State<Arc<AppState>>, user: CurrentUser) -> AppResult<Html<String>> {
    let backend = user.backend(&state);
    let loads = Section::ALL.map(|section| trailers_in_section(&backend, section, SECTION_LIMIT));
    let (ctx, lists) = tokio::join!(PageContext::load(&backend, &user), future::try_join_all(loads));

    let sections: Vec<_> = Section::ALL.into_iter().zip(lists?).collect();
    Ok(Html(templates::home_page(&ctx.nav, &sections)))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Html<String>> {
    let backend = user.backend(&state);
    let (ctx, trailers) =
        tokio::join!(PageContext::load(&backend, &user), search_trailers(&backend, &params.q, SEARCH_LIMIT));

    Ok(Html(templates::search_page(&ctx.nav, &params.q, &trailers?)))
}

pub async fn categories(State(state): State<Arc<AppState>>, user: CurrentUser) -> AppResult<Html<String>> {
    let backend = user.backend(&state);
    let (ctx, trailers) = tokio::join!(PageContext::load(&backend, &user), all_trailers(&backend, CATALOG_LIMIT));

    let groups = group_by_category(&trailers?);
    Ok(Html(templates::categories_page(&ctx.nav, &groups)))
}

pub async fn category(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(slug): Path<String>,
) -> AppResult<Html<String>> {
    let category = Category::from_slug(&slug).ok_or_else(|| AppError::NotFound(format!("category {slug}")))?;
    let backend = user.backend(&state);
    let (ctx, trailers) = tokio::join!(PageContext::load(&backend, &user), all_trailers(&backend, CATALOG_LIMIT));

    let trailers: Vec<_> =
        trailers?.into_iter().filter(|t| categories_of(&t.category).contains(&category)).collect();
    Ok(Html(templates::category_page(&ctx.nav, category, &trailers)))
}

async fn load_movie_view<B: Backend>(backend: &B, user_id: &str, trailer_id: &str) -> AppResult<MovieView> {
    let trailer = get_trailer(backend, trailer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("movie {trailer_id}")))?;
    let (favorite, watchlist, comments) = tokio::try_join!(
        is_member(backend, MembershipKind::Favorite, user_id, &trailer.id),
        is_member(backend, MembershipKind::Watchlist, user_id, &trailer.id),
        list_comments(backend, &trailer.id, Some(user_id)),
    )?;
    Ok(MovieView {
        trailer,
        favorite: Membership::from_present(favorite),
        watchlist: Membership::from_present(watchlist),
        comments,
    })
}

/// The user's slot for a movie page, loading it when the page was never
/// rendered for them or its slot has expired.
async fn movie_slot<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    user_id: &str,
    trailer_id: &str,
) -> AppResult<Arc<ViewSlot<MovieView>>> {
    if let Some(slot) = views.get(user_id, trailer_id) {
        return Ok(slot);
    }
    let view = load_movie_view(backend, user_id, trailer_id).await?;
    Ok(views.load(user_id, view).0)
}

pub async fn movie(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Html<String>> {
    let backend = user.backend(&state);
    let (ctx, view) = tokio::join!(PageContext::load(&backend, &user), load_movie_view(&backend, &user.id, &id));

    let view = view?;
    state.views.load(&user.id, view.clone());
    Ok(Html(templates::movie_page(&ctx.nav, &view, &ctx.requester)))
}

pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    toggle_list(&state.views, &user.backend(&state), &headers, &user.id, &id, TrailerList::Favorites)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

pub async fn toggle_watchlist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    toggle_list(&state.views, &user.backend(&state), &headers, &user.id, &id, TrailerList::Watchlist)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

async fn toggle_list<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    headers: &HeaderMap,
    user_id: &str,
    trailer_id: &str,
    list: TrailerList,
) -> AppResult<Response> {
    let slot = movie_slot(views, backend, user_id, trailer_id).await?;
    let trailer = slot.snapshot().trailer;

    let outcome = optimistic(
        &slot,
        |v: &mut MovieView| v.flip(list),
        |v: &mut MovieView| v.flip(list),
        async {
            match list {
                TrailerList::Favorites => memberships::toggle_favorite(backend, user_id, &trailer).await,
                TrailerList::Watchlist => memberships::toggle_watchlist(backend, user_id, &trailer).await,
            }
        },
    )
    .await;

    let error = match outcome {
        Outcome::Applied { value, result, ticket } => {
            debug!(user_id, trailer_id = %trailer.id, list = list.label(), ?result, "list toggled");
            if value.membership(list) != result {
                slot.apply(ticket, |v| v.set_membership(list, result));
            }
            None
        },
        Outcome::Reverted { error, .. } => Some(error),
        Outcome::Stale => None,
    };

    if !is_datastar(headers) {
        return match error {
            Some(err) => Err(err),
            None => Ok(Redirect::to(&movie_url(&trailer.id)).into_response()),
        };
    }
    let message = error.map(|err| {
        warn!(user_id, trailer_id = %trailer.id, list = list.label(), error = %err, "toggle reverted");
        err.user_message()
    });
    Ok(fragment(ACTIONS_SELECTOR, templates::movie_actions(&slot.snapshot(), message.as_deref())))
}

/// Respond to a comment action: the refreshed comment list for fragment
/// requests, a redirect back to the movie otherwise.
fn comments_response(
    headers: &HeaderMap,
    slot: &ViewSlot<MovieView>,
    requester: &Requester,
    trailer_id: &str,
    error: Option<AppError>,
) -> AppResult<Response> {
    if !is_datastar(headers) {
        return match error {
            Some(err) => Err(err),
            None => Ok(Redirect::to(&movie_url(trailer_id)).into_response()),
        };
    }
    let message = error.map(|err| {
        warn!(user_id = %requester.id, trailer_id, error = %err, "comment action failed");
        err.user_message()
    });
    Ok(fragment(COMMENTS_SELECTOR, templates::comments_section(&slot.snapshot(), requester, message.as_deref())))
}

async fn require_comment<B: Backend>(backend: &B, comment_id: &str) -> AppResult<CommentRow> {
    get_comment(backend, comment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("comment {comment_id}")))
}

/// The comment, its movie's slot and the acting user's role.
async fn comment_context<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    user_id: &str,
    comment_id: &str,
) -> AppResult<(CommentRow, Arc<ViewSlot<MovieView>>, Requester)> {
    let comment = require_comment(backend, comment_id).await?;
    let (slot, requester) = tokio::join!(
        movie_slot(views, backend, user_id, &comment.trailer_id),
        profiles::requester(backend, user_id),
    );
    Ok((comment, slot?, requester))
}

pub async fn post_comment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<ContentForm>,
) -> Response {
    post_comment_inner(&state.views, &user.backend(&state), &headers, &user.id, &id, &form.content)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

async fn post_comment_inner<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    headers: &HeaderMap,
    user_id: &str,
    trailer_id: &str,
    content: &str,
) -> AppResult<Response> {
    let (slot, requester) =
        tokio::join!(movie_slot(views, backend, user_id, trailer_id), profiles::requester(backend, user_id));
    let slot = slot?;
    let ticket = slot.ticket();
    let trailer = slot.snapshot().trailer;

    let error = match add_comment(backend, user_id, &trailer, content).await {
        Ok(row) => {
            info!(user_id, trailer_id = %trailer.id, comment_id = %row.id, "comment posted");
            match list_comments(backend, &trailer.id, Some(user_id)).await {
                Ok(comments) => {
                    slot.apply(ticket, |v| v.comments = comments);
                },
                Err(err) => warn!(trailer_id = %trailer.id, error = %err, "failed to refresh comments"),
            }
            None
        },
        Err(err) => Some(err),
    };
    comments_response(headers, &slot, &requester, &trailer.id, error)
}

pub async fn like(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    like_inner(&state.views, &user.backend(&state), &headers, &user.id, &id)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

async fn like_inner<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    headers: &HeaderMap,
    user_id: &str,
    comment_id: &str,
) -> AppResult<Response> {
    let (comment, slot, requester) = comment_context(views, backend, user_id, comment_id).await?;

    let liked = slot.snapshot().comments.iter().any(|c| c.id == comment.id && c.liked_by_viewer);
    let outcome = optimistic(
        &slot,
        |v: &mut MovieView| v.set_liked(&comment.id, !liked),
        |v: &mut MovieView| v.set_liked(&comment.id, liked),
        like_comment(backend, user_id, &comment.id),
    )
    .await;

    let error = match outcome {
        Outcome::Applied { result, ticket, .. } => {
            slot.apply(ticket, |v| v.set_liked(&comment.id, result.is_present()));
            None
        },
        Outcome::Reverted { error, .. } => Some(error),
        Outcome::Stale => None,
    };
    comments_response(headers, &slot, &requester, &comment.trailer_id, error)
}

pub async fn edit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<ContentForm>,
) -> Response {
    edit_inner(&state.views, &user.backend(&state), &headers, &user.id, &id, &form.content)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

async fn edit_inner<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    headers: &HeaderMap,
    user_id: &str,
    comment_id: &str,
    content: &str,
) -> AppResult<Response> {
    let (comment, slot, requester) = comment_context(views, backend, user_id, comment_id).await?;

    let previous = slot
        .snapshot()
        .comments
        .iter()
        .find(|c| c.id == comment.id)
        .map_or_else(|| comment.content.clone(), |c| c.content.clone());
    let outcome = optimistic(
        &slot,
        |v: &mut MovieView| v.set_comment_content(&comment.id, content.trim()),
        |v: &mut MovieView| v.set_comment_content(&comment.id, &previous),
        edit_comment(backend, &requester, &comment.id, content),
    )
    .await;

    let error = match outcome {
        Outcome::Applied { result, ticket, .. } => {
            info!(user_id, comment_id = %result.id, "comment edited");
            slot.apply(ticket, |v| v.set_comment_content(&result.id, &result.content));
            None
        },
        Outcome::Reverted { error, ticket } => {
            // The revert restores what this page showed; the stored row is authoritative.
            match get_comment(backend, &comment.id).await {
                Ok(Some(stored)) => {
                    slot.apply(ticket, |v| v.set_comment_content(&stored.id, &stored.content));
                },
                Ok(None) => {
                    slot.apply(ticket, |v| v.comments.retain(|c| c.id != comment.id));
                },
                Err(err) => warn!(comment_id = %comment.id, error = %err, "failed to reconcile comment"),
            }
            Some(error)
        },
        Outcome::Stale => None,
    };
    comments_response(headers, &slot, &requester, &comment.trailer_id, error)
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Response {
    delete_inner(&state.views, &user.backend(&state), &headers, &user.id, &id)
        .await
        .unwrap_or_else(|err| failure(&headers, err))
}

async fn delete_inner<B: Backend>(
    views: &ViewRegistry,
    backend: &B,
    headers: &HeaderMap,
    user_id: &str,
    comment_id: &str,
) -> AppResult<Response> {
    let (comment, slot, requester) = comment_context(views, backend, user_id, comment_id).await?;

    let before = slot.snapshot().comments;
    let outcome = optimistic(
        &slot,
        |v: &mut MovieView| v.comments.retain(|c| c.id != comment.id),
        move |v: &mut MovieView| v.comments = before,
        delete_comment(backend, &requester, &comment.id),
    )
    .await;

    let error = match outcome {
        Outcome::Applied { .. } => {
            info!(user_id, comment_id = %comment.id, "comment deleted");
            None
        },
        Outcome::Reverted { error, .. } => Some(error),
        Outcome::Stale => None,
    };
    comments_response(headers, &slot, &requester, &comment.trailer_id, error)
}

async fn render_profile(
    state: &AppState,
    user: &CurrentUser,
    error: Option<&str>,
    notice: Option<&str>,
) -> String {
    let backend = user.backend(state);
    let max_concurrent = state.config.max_concurrent;
    let (ctx, favorites, watchlist) = tokio::join!(
        PageContext::load(&backend, user),
        fetch_memberships(&backend, TrailerList::Favorites, &user.id, max_concurrent),
        fetch_memberships(&backend, TrailerList::Watchlist, &user.id, max_concurrent),
    );

    let mut actors: Vec<String> = ctx.notifications.iter().map(|n| n.actor_id.clone()).collect();
    actors.sort();
    actors.dedup();
    let names = display_names(&backend, &actors).await;
    let notifications: Vec<(Notification, String)> = ctx
        .notifications
        .iter()
        .map(|n| {
            let actor = names.get(&n.actor_id).cloned().unwrap_or_else(|| synthesized_name(&n.actor_id));
            (n.clone(), actor)
        })
        .collect();

    let data = ProfileData {
        profile: &ctx.profile,
        favorites: &favorites,
        watchlist: &watchlist,
        notifications: &notifications,
    };
    templates::profile_page(&ctx.nav, &data, error, notice)
}

pub async fn profile(State(state): State<Arc<AppState>>, user: CurrentUser) -> Html<String> {
    Html(render_profile(&state, &user, None, None).await)
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Form(form): Form<UsernameForm>,
) -> Response {
    let backend = user.backend(&state);
    match update_username(&backend, &user.id, user.email.as_deref(), &form.username).await {
        Ok(profile) => {
            info!(user_id = %user.id, username = ?profile.username, "username updated");
            Redirect::to("/profile").into_response()
        },
        Err(err) if err.status().is_client_error() && !matches!(err, AppError::Unauthorized) => {
            let page = render_profile(&state, &user, Some(&err.user_message()), None).await;
            (err.status(), Html(page)).into_response()
        },
        Err(err) => err.into_response(),
    }
}

pub async fn mark_notifications_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> AppResult<Redirect> {
    let count = mark_all_read(&user.backend(&state), &user.id).await?;
    debug!(user_id = %user.id, count, "notifications marked read");
    Ok(Redirect::to("/profile"))
}

pub async fn upload_poster(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Html<String>> {
    let backend = user.backend(&state);
    let ctx = PageContext::load(&backend, &user).await;
    if !ctx.requester.is_admin {
        return Err(AppError::forbidden("only admins can upload posters"));
    }

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::invalid(e.body_text()))? {
        if field.name() != Some("poster") {
            continue;
        }
        let name = field.file_name().unwrap_or("poster").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| AppError::invalid(e.body_text()))?;
        file = Some((name, content_type, bytes.to_vec()));
        break;
    }
    let (name, content_type, bytes) = file.ok_or_else(|| AppError::invalid("choose a poster file to upload"))?;

    let url = storage::upload_poster(&backend, &ctx.requester, bytes, &name, &content_type).await?;
    Ok(Html(templates::poster_uploaded_page(&ctx.nav, &url)))
}

pub async fn backfill_trailers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    user: CurrentUser,
) -> Response {
    backfill_inner(&state, &headers, &user).await.unwrap_or_else(|err| failure(&headers, err))
}

async fn backfill_inner(state: &AppState, headers: &HeaderMap, user: &CurrentUser) -> AppResult<Response> {
    let backend = user.backend(state);
    let ctx = PageContext::load(&backend, user).await;
    if !ctx.requester.is_admin {
        return Err(AppError::forbidden("only admins can run the trailer backfill"));
    }

    match state.resolver.cache().purge_expired().await {
        Ok(0) => {},
        Ok(removed) => debug!(removed, "purged expired trailer lookups"),
        Err(err) => warn!(error = %err, "failed to purge trailer lookups"),
    }

    info!(user_id = %user.id, "trailer backfill started");
    let summary = resolver::backfill(&backend, &state.resolver, state.config.max_concurrent).await?;
    if is_datastar(headers) {
        Ok(fragment(ADMIN_RESULT_SELECTOR, templates::backfill_fragment(&summary)))
    } else {
        Ok(Html(templates::backfill_page(&ctx.nav, &summary)).into_response())
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use assert_matches::assert_matches;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        backend::{
            Table,
            memory::{MemoryBackend, Op},
        },
        data::fixtures::draft,
        models::Comment,
        testing::{fake_server, test_state},
    };

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn pages_without_a_session_redirect_to_login() {
        let app = router(test_state("http://127.0.0.1:9").await);

        for uri in ["/", "/search?q=dune", "/categories", "/movie/1", "/profile"] {
            let resp = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(resp.headers()[header::LOCATION], "/login", "{uri}");
        }
    }

    #[tokio::test]
    async fn login_page_is_public() {
        let app = router(test_state("http://127.0.0.1:9").await);

        let resp = app.oneshot(get("/login")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("Create an account"));
    }

    #[tokio::test]
    async fn rejected_token_redirects_to_login() {
        let (base, seen) = fake_server(StatusCode::UNAUTHORIZED, json!({"msg": "invalid JWT"})).await;
        let app = router(test_state(&base).await);

        let req = Request::builder()
            .uri("/categories")
            .header(header::COOKIE, "mf_access=stale")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].uri, "/auth/v1/user");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer stale"));
    }

    #[tokio::test]
    async fn failed_sign_in_shows_the_backend_message() {
        let (base, _) = fake_server(
            StatusCode::BAD_REQUEST,
            json!({"error": "invalid_grant", "error_description": "Invalid login credentials"}),
        )
        .await;
        let app = router(test_state(&base).await);

        let resp = app.oneshot(form("/login", "email=a%40b.co&password=wrong")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(resp).await.contains("Invalid login credentials"));
    }

    #[tokio::test]
    async fn successful_sign_in_sets_session_cookies() {
        let (base, _) = fake_server(
            StatusCode::OK,
            json!({"access_token": "jwt", "refresh_token": "r", "expires_in": 3600, "user": {"id": "u-1"}}),
        )
        .await;
        let app = router(test_state(&base).await);

        let resp = app.oneshot(form("/login", "email=a%40b.co&password=secret1")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let cookies: Vec<_> = resp.headers().get_all(header::SET_COOKIE).iter().map(|v| v.to_str().unwrap()).collect();
        assert!(cookies.iter().any(|c| c.starts_with("mf_access=jwt")));
        assert!(cookies.iter().any(|c| c.starts_with("mf_refresh=r")));
    }

    fn datastar() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("datastar-request", HeaderValue::from_static("true"));
        headers
    }

    fn form(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    /// A movie page as it was rendered earlier, before the backend changed.
    fn cached_view(comments: Vec<Comment>) -> MovieView {
        MovieView {
            trailer: draft("1", "Alien"),
            favorite: Membership::Absent,
            watchlist: Membership::Absent,
            comments,
        }
    }

    fn seeded_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.seed(
            Table::Trailers,
            [json!({"id": "1", "title": "Alien", "poster_url": "https://image.tmdb.org/t/p/w500/1.jpg"})],
        );
        backend
    }

    #[tokio::test]
    async fn toggle_corrects_a_stale_page_from_the_backend_result() {
        let backend = seeded_backend();
        backend.seed(Table::Favorites, [json!({"user_id": "u", "trailer_id": "1"})]);
        let views = ViewRegistry::new();
        views.load("u", cached_view(Vec::new()));

        let resp = toggle_list(&views, &backend, &datastar(), "u", "1", TrailerList::Favorites).await.unwrap();

        assert_eq!(resp.headers()["datastar-selector"], ACTIONS_SELECTOR);
        assert!(backend.rows(Table::Favorites).is_empty());
        assert_eq!(views.get("u", "1").unwrap().snapshot().favorite, Membership::Absent);
        assert!(body_text(resp).await.contains("☆ Favorite"));
    }

    #[tokio::test]
    async fn failed_toggle_reverts_and_reports() {
        let backend = seeded_backend();
        backend.fail(Op::Insert, Table::Watchlist);
        let views = ViewRegistry::new();
        views.load("u", cached_view(Vec::new()));

        let resp = toggle_list(&views, &backend, &datastar(), "u", "1", TrailerList::Watchlist).await.unwrap();

        assert_eq!(views.get("u", "1").unwrap().snapshot().watchlist, Membership::Absent);
        let html = body_text(resp).await;
        assert!(html.contains("+ Watchlist"));
        assert!(html.contains("injected Insert failure"));

        let full_page = toggle_list(&views, &backend, &HeaderMap::new(), "u", "1", TrailerList::Watchlist).await;
        assert_matches!(full_page, Err(AppError::Backend { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn toggle_without_a_cached_page_loads_it_first() {
        let backend = seeded_backend();
        let views = ViewRegistry::new();

        let resp = toggle_list(&views, &backend, &HeaderMap::new(), "u", "1", TrailerList::Favorites).await.unwrap();

        assert_eq!(resp.headers()[header::LOCATION], "/movie/1");
        assert_eq!(views.get("u", "1").unwrap().snapshot().favorite, Membership::Present);
        assert_eq!(backend.rows(Table::Favorites).len(), 1);
    }

    #[tokio::test]
    async fn forbidden_edit_shows_the_stored_content() {
        let backend = seeded_backend();
        backend.seed(
            Table::Comments,
            [json!({"id": "c1", "user_id": "author", "trailer_id": "1", "content": "stored take"})],
        );
        let stale = list_comments(&backend, "1", Some("author"))
            .await
            .unwrap()
            .into_iter()
            .map(|c| Comment { content: "older take".into(), ..c })
            .collect();
        let views = ViewRegistry::new();
        views.load("author", cached_view(stale));

        let resp = edit_inner(&views, &backend, &datastar(), "author", "c1", "rewritten").await.unwrap();

        assert_eq!(resp.headers()["datastar-selector"], COMMENTS_SELECTOR);
        let slot = views.get("author", "1").unwrap();
        assert_eq!(slot.snapshot().comments[0].content, "stored take");
        assert_eq!(backend.rows(Table::Comments)[0]["content"], "stored take");
        let html = body_text(resp).await;
        assert!(html.contains("you cannot edit this comment"));
        assert!(html.contains("stored take"));
        assert!(!html.contains("rewritten"));
    }

    #[tokio::test]
    async fn failed_delete_restores_the_whole_list() {
        let backend = seeded_backend();
        backend.seed(Table::Profiles, [json!({"id": "author", "is_admin": true})]);
        backend.seed(
            Table::Comments,
            [
                json!({"id": "c1", "user_id": "author", "trailer_id": "1", "content": "first"}),
                json!({"id": "c2", "user_id": "guest", "trailer_id": "1", "content": "second"}),
            ],
        );
        let before = list_comments(&backend, "1", Some("author")).await.unwrap();
        let views = ViewRegistry::new();
        views.load("author", cached_view(before.clone()));
        backend.fail(Op::Delete, Table::Comments);

        let resp = delete_inner(&views, &backend, &datastar(), "author", "c1").await.unwrap();

        assert_eq!(views.get("author", "1").unwrap().snapshot().comments, before);
        assert_eq!(backend.rows(Table::Comments).len(), 2);
        assert!(body_text(resp).await.contains("Comments (2)"));

        backend.clear_failures();
        delete_inner(&views, &backend, &datastar(), "author", "c1").await.unwrap();
        let remaining = views.get("author", "1").unwrap().snapshot().comments;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "c2");
    }

    #[tokio::test]
    async fn reset_link_token_is_sent_as_bearer() {
        let (base, seen) = fake_server(StatusCode::OK, json!({"id": "u-1", "email": "a@b.co"})).await;
        let app = router(test_state(&base).await);

        let resp = app
            .oneshot(form("/reset-password", "access_token=recovery-jwt&password=fresh-secret"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login");
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].uri, "/auth/v1/user");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer recovery-jwt"));
        assert_eq!(seen[0].body["password"], "fresh-secret");
    }

    #[tokio::test]
    async fn expired_reset_link_asks_for_a_new_one() {
        let (base, _) = fake_server(StatusCode::UNAUTHORIZED, json!({"msg": "invalid JWT"})).await;
        let app = router(test_state(&base).await);

        let resp = app.oneshot(form("/reset-password", "access_token=old&password=fresh-secret")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(resp).await.contains("expired"));
    }

    #[tokio::test]
    async fn reset_page_is_public_and_carries_the_token() {
        let app = router(test_state("http://127.0.0.1:9").await);

        let resp = app.clone().oneshot(get("/reset-password?access_token=abc")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains(r#"value="abc""#));

        let resp = app.oneshot(get("/reset-password")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("location.hash"));
    }

    #[test]
    fn fragments_target_their_element() {
        let resp = fragment(ACTIONS_SELECTOR, "<div id=\"movie-actions\"></div>".to_string());
        assert_eq!(resp.headers()["datastar-selector"], "#movie-actions");
        assert_eq!(resp.headers()["datastar-mode"], "outer");
    }

    #[test]
    fn fragment_failures_become_flash_messages() {
        let mut headers = HeaderMap::new();
        headers.insert("datastar-request", HeaderValue::from_static("true"));

        let resp = failure(&headers, AppError::forbidden("you cannot edit this comment"));
        assert_eq!(resp.headers()["datastar-selector"], FLASH_SELECTOR);

        let resp = failure(&HeaderMap::new(), AppError::forbidden("you cannot edit this comment"));
        assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
