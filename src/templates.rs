use std::collections::BTreeMap;

use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::{
    data::comments::{MAX_COMMENT_CHARS, can_mutate_comment},
    genre::Category,
    models::{Comment, Notification, Profile, Requester, Section, Trailer},
    resolver::BackfillSummary,
    view::MovieView,
};

const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";
const DATASTAR_CDN: &str =
    "https://cdn.jsdelivr.net/npm/@sudodevnull/datastar@0.19.9/dist/datastar.js";
/// Recovery links carry the token in the URL fragment, which never reaches
/// the server; move it into the query string, or go to sign-in without one.
const RECOVERY_SCRIPT: &str = "const p = new URLSearchParams(location.hash.slice(1)); \
    location.replace(p.get('access_token') ? '/reset-password?access_token=' + encodeURIComponent(p.get('access_token')) : '/login');";

pub const ACTIONS_ID: &str = "movie-actions";
pub const ACTIONS_SELECTOR: &str = "#movie-actions";
pub const COMMENTS_ID: &str = "comments";
pub const COMMENTS_SELECTOR: &str = "#comments";
pub const ADMIN_RESULT_SELECTOR: &str = "#admin-result";
pub const FLASH_SELECTOR: &str = "#flash";

/// Navigation context for signed-in pages.
pub struct Nav {
    pub name: String,
    pub is_admin: bool,
    pub unread: usize,
}

pub fn login_page(error: Option<&str>, notice: Option<&str>) -> String {
    page(
        "Sign in · Mehflix",
        None,
        html! {
            div class="min-h-screen bg-gray-950 flex items-center justify-center" {
                div class="max-w-md w-full px-6" {
                    div class="bg-gray-900 shadow rounded-lg p-8" {
                        h1 class="text-3xl font-bold text-white" { "Mehflix" }
                        p class="mt-2 text-gray-400" { "Sign in to browse trailers and keep your lists." }
                        (flash(error, notice))

                        form class="mt-8 space-y-4" method="post" action="/login" {
                            (input_field("email", "Email", "email"))
                            (input_field("password", "Password", "password"))
                            button class=(PRIMARY_BUTTON) type="submit" { "Sign in" }
                        }
                        a class="mt-4 inline-block text-sm text-amber-400 hover:text-amber-300" href="/forgot-password" { "Forgot password?" }

                        div class="mt-8 border-t border-gray-800 pt-6" {
                            h2 class="text-lg font-semibold text-white" { "Create an account" }
                            form class="mt-4 space-y-4" method="post" action="/signup" {
                                (input_field("email", "Email", "email"))
                                (input_field("password", "Password (6+ characters)", "password"))
                                button class=(SECONDARY_BUTTON) type="submit" { "Sign up" }
                            }
                        }
                    }
                }
            }
        },
    )
}

pub fn forgot_password_page(error: Option<&str>, notice: Option<&str>) -> String {
    page(
        "Reset password · Mehflix",
        None,
        html! {
            div class="min-h-screen bg-gray-950 flex items-center justify-center" {
                div class="max-w-md w-full px-6" {
                    div class="bg-gray-900 shadow rounded-lg p-8" {
                        h1 class="text-2xl font-bold text-white" { "Reset your password" }
                        p class="mt-2 text-gray-400" { "We'll email you a link to choose a new one." }
                        (flash(error, notice))
                        form class="mt-6 space-y-4" method="post" action="/forgot-password" {
                            (input_field("email", "Email", "email"))
                            button class=(PRIMARY_BUTTON) type="submit" { "Send reset link" }
                        }
                        a class="mt-4 inline-block text-sm text-amber-400 hover:text-amber-300" href="/login" { "Back to sign in" }
                    }
                }
            }
        },
    )
}

/// Choose a new password with the token from a recovery email.
pub fn reset_password_page(access_token: Option<&str>, error: Option<&str>) -> String {
    page(
        "Reset password · Mehflix",
        None,
        html! {
            div class="min-h-screen bg-gray-950 flex items-center justify-center" {
                div class="max-w-md w-full px-6" {
                    div class="bg-gray-900 shadow rounded-lg p-8" {
                        h1 class="text-2xl font-bold text-white" { "Choose a new password" }
                        @if let Some(token) = access_token {
                            (flash(error, None))
                            form class="mt-6 space-y-4" method="post" action="/reset-password" {
                                input type="hidden" name="access_token" value=(token);
                                (input_field("password", "New password", "password"))
                                button class=(PRIMARY_BUTTON) type="submit" { "Set new password" }
                            }
                        } @else {
                            p class="mt-2 text-gray-400" { "Checking your reset link..." }
                            script { (PreEscaped(RECOVERY_SCRIPT)) }
                        }
                    }
                }
            }
        },
    )
}

pub fn change_password_page(nav: &Nav, error: Option<&str>, notice: Option<&str>) -> String {
    page(
        "Change password · Mehflix",
        Some(nav),
        html! {
            div class="max-w-md mx-auto px-6 py-12" {
                div class="bg-gray-900 shadow rounded-lg p-8" {
                    h1 class="text-2xl font-bold text-white" { "Change password" }
                    (flash(error, notice))
                    form class="mt-6 space-y-4" method="post" action="/account/password" {
                        (input_field("password", "New password", "password"))
                        button class=(PRIMARY_BUTTON) type="submit" { "Change password" }
                    }
                }
            }
        },
    )
}

pub fn home_page(nav: &Nav, sections: &[(Section, Vec<Trailer>)]) -> String {
    page(
        "Mehflix",
        Some(nav),
        html! {
            div class="max-w-6xl mx-auto px-6 py-10 space-y-12" {
                @for (section, trailers) in sections {
                    section {
                        h2 class="text-2xl font-bold text-white" { (section.heading()) }
                        @if trailers.is_empty() {
                            p class="mt-4 text-gray-500" { "Nothing here yet." }
                        } @else {
                            (poster_grid(trailers))
                        }
                    }
                }
            }
        },
    )
}

pub fn categories_page(nav: &Nav, groups: &BTreeMap<Category, Vec<Trailer>>) -> String {
    page(
        "Categories · Mehflix",
        Some(nav),
        html! {
            div class="max-w-6xl mx-auto px-6 py-10" {
                h1 class="text-3xl font-bold text-white" { "Categories" }
                div class="mt-8 grid gap-4 sm:grid-cols-2 md:grid-cols-3" {
                    @for category in Category::ALL {
                        @let count = groups.get(&category).map_or(0, Vec::len);
                        a class="block rounded-lg bg-gray-900 p-6 hover:bg-gray-800" href=(format!("/category/{}", category.slug())) {
                            h2 class="text-xl font-semibold text-white" { (category.name()) }
                            p class="mt-1 text-sm text-gray-400" { (count) " titles" }
                        }
                    }
                }
            }
        },
    )
}

pub fn search_page(nav: &Nav, term: &str, trailers: &[Trailer]) -> String {
    page(
        "Search · Mehflix",
        Some(nav),
        html! {
            div class="max-w-6xl mx-auto px-6 py-10" {
                h1 class="text-3xl font-bold text-white" { "Search" }
                (search_form(term, "mt-4 w-full max-w-xl"))
                @if term.trim().is_empty() {
                    p class="mt-6 text-gray-500" { "Type a title to search the catalog." }
                } @else if trailers.is_empty() {
                    p class="mt-6 text-gray-500" { "No trailers match \"" (term.trim()) "\"." }
                } @else {
                    p class="mt-6 text-sm text-gray-400" { (trailers.len()) " results for \"" (term.trim()) "\"" }
                    (poster_grid(trailers))
                }
            }
        },
    )
}

pub fn category_page(nav: &Nav, category: Category, trailers: &[Trailer]) -> String {
    page(
        &format!("{} · Mehflix", category.name()),
        Some(nav),
        html! {
            div class="max-w-6xl mx-auto px-6 py-10" {
                a class="text-sm text-amber-400 hover:text-amber-300" href="/categories" { "All categories" }
                h1 class="mt-2 text-3xl font-bold text-white" { (category.name()) }
                @if trailers.is_empty() {
                    p class="mt-6 text-gray-500" { "No titles in this category yet." }
                } @else {
                    (poster_grid(trailers))
                }
            }
        },
    )
}

pub fn movie_page(nav: &Nav, view: &MovieView, viewer: &Requester) -> String {
    let trailer = &view.trailer;
    page(
        &format!("{} · Mehflix", trailer.title),
        Some(nav),
        html! {
            div class="max-w-5xl mx-auto px-6 py-10" {
                div class="grid gap-8 md:grid-cols-3" {
                    img class="w-full rounded-lg shadow" src=(trailer.poster_url) alt=(trailer.title);
                    div class="md:col-span-2" {
                        h1 class="text-3xl font-bold text-white" { (trailer.title) }
                        @if !trailer.category.is_empty() {
                            p class="mt-2 text-gray-400" { (trailer.category) }
                        }
                        (PreEscaped(movie_actions(view, None)))
                        @if let Some(embed) = trailer.embed_url() {
                            div class="mt-6 aspect-video" {
                                iframe class="w-full h-full rounded-lg" src=(embed) title=(trailer.title) allowfullscreen {}
                            }
                        } @else {
                            p class="mt-6 text-gray-500" { "No trailer available yet." }
                        }
                    }
                }
                (PreEscaped(comments_section(view, viewer, None)))
            }
        },
    )
}

/// Favorite and watchlist buttons, replaced in place after a toggle.
pub fn movie_actions(view: &MovieView, error: Option<&str>) -> String {
    let id = &view.trailer.id;
    let toggle = |action: &str, on: bool, on_label: &str, off_label: &str| {
        let url = format!("/movie/{}/{action}", urlencoding::encode(id));
        html! {
            form method="post" action=(url) data-on-submit=(datastar_post(&url)) {
                button class=(if on { PRIMARY_BUTTON } else { SECONDARY_BUTTON }) type="submit" {
                    (if on { on_label } else { off_label })
                }
            }
        }
    };

    html! {
        div id=(ACTIONS_ID) class="mt-6 flex gap-3" {
            (toggle("favorite", view.favorite.is_present(), "★ Favorited", "☆ Favorite"))
            (toggle("watchlist", view.watchlist.is_present(), "✓ On watchlist", "+ Watchlist"))
            (flash(error, None))
        }
    }
    .into_string()
}

/// The comment list with its forms, replaced in place after any comment action.
pub fn comments_section(view: &MovieView, viewer: &Requester, error: Option<&str>) -> String {
    let post_url = format!("/movie/{}/comments", urlencoding::encode(&view.trailer.id));
    html! {
        section id=(COMMENTS_ID) class="mt-12" {
            h2 class="text-2xl font-bold text-white" { "Comments (" (view.comments.len()) ")" }
            (flash(error, None))
            form class="mt-4 space-y-3" method="post" action=(post_url) data-on-submit=(datastar_post(&post_url)) {
                textarea class=(TEXT_INPUT) name="content" rows="3" maxlength=(MAX_COMMENT_CHARS) placeholder="Share your thoughts" required {}
                button class=(PRIMARY_BUTTON) type="submit" { "Post comment" }
            }
            @if view.comments.is_empty() {
                p class="mt-6 text-gray-500" { "Be the first to comment." }
            } @else {
                ul class="mt-6 space-y-4" {
                    @for comment in &view.comments {
                        (comment_item(comment, viewer))
                    }
                }
            }
        }
    }
    .into_string()
}

fn comment_item(comment: &Comment, viewer: &Requester) -> Markup {
    let base = format!("/comments/{}", urlencoding::encode(&comment.id));
    let like_url = format!("{base}/like");
    let edit_url = format!("{base}/edit");
    let delete_url = format!("{base}/delete");

    html! {
        li class="rounded-lg bg-gray-900 p-4" {
            div class="flex items-center justify-between text-sm text-gray-400" {
                span class="font-medium text-gray-200" { (comment.author_name) }
                span { (comment.created_at.strftime("%Y-%m-%d %H:%M")) }
            }
            p class="mt-2 text-gray-100 whitespace-pre-line" { (comment.content) }
            div class="mt-3 flex items-center gap-4" {
                form method="post" action=(like_url) data-on-submit=(datastar_post(&like_url)) {
                    button class="text-sm text-amber-400 hover:text-amber-300" type="submit" {
                        (if comment.liked_by_viewer { "♥" } else { "♡" }) " " (comment.likes)
                    }
                }
                @if can_mutate_comment(viewer, &comment.user_id) {
                    form method="post" action=(delete_url) data-on-submit=(datastar_post(&delete_url)) {
                        button class="text-sm text-red-400 hover:text-red-300" type="submit" { "Delete" }
                    }
                }
            }
            @if can_mutate_comment(viewer, &comment.user_id) {
                form class="mt-3 flex gap-2" method="post" action=(edit_url) data-on-submit=(datastar_post(&edit_url)) {
                    input class=(TEXT_INPUT) name="content" value=(comment.content) maxlength=(MAX_COMMENT_CHARS) required;
                    button class=(SECONDARY_BUTTON) type="submit" { "Save" }
                }
            }
        }
    }
}

pub struct ProfileData<'a> {
    pub profile: &'a Profile,
    pub favorites: &'a [Trailer],
    pub watchlist: &'a [Trailer],
    pub notifications: &'a [(Notification, String)],
}

pub fn profile_page(nav: &Nav, data: &ProfileData, error: Option<&str>, notice: Option<&str>) -> String {
    let profile = data.profile;
    page(
        "Profile · Mehflix",
        Some(nav),
        html! {
            div class="max-w-6xl mx-auto px-6 py-10 space-y-12" {
                section class="bg-gray-900 rounded-lg p-6" {
                    h1 class="text-3xl font-bold text-white" { (profile.display_name()) }
                    @if let Some(email) = &profile.email {
                        p class="mt-1 text-gray-400" { (email) }
                    }
                    (flash(error, notice))
                    form class="mt-6 flex gap-3 max-w-md" method="post" action="/profile" {
                        input class=(TEXT_INPUT) name="username" value=(profile.username.as_deref().unwrap_or_default()) placeholder="Username" required;
                        button class=(SECONDARY_BUTTON) type="submit" { "Save" }
                    }
                    a class="mt-4 inline-block text-sm text-amber-400 hover:text-amber-300" href="/account/password" { "Change password" }
                }

                section {
                    div class="flex items-center justify-between" {
                        h2 class="text-2xl font-bold text-white" { "Notifications" }
                        @if data.notifications.iter().any(|(n, _)| !n.read) {
                            form method="post" action="/notifications/read" {
                                button class="text-sm text-amber-400 hover:text-amber-300" type="submit" { "Mark all read" }
                            }
                        }
                    }
                    @if data.notifications.is_empty() {
                        p class="mt-4 text-gray-500" { "No notifications." }
                    } @else {
                        ul class="mt-4 space-y-2" {
                            @for (note, actor) in data.notifications {
                                li class=(if note.read { "text-gray-500" } else { "text-gray-100" }) {
                                    (actor) " liked your comment on "
                                    a class="text-amber-400 hover:text-amber-300" href=(format!("/movie/{}", urlencoding::encode(&note.trailer_id))) { "this movie" }
                                }
                            }
                        }
                    }
                }

                section {
                    h2 class="text-2xl font-bold text-white" { "Favorites" }
                    @if data.favorites.is_empty() { p class="mt-4 text-gray-500" { "No favorites yet." } }
                    @else { (poster_grid(data.favorites)) }
                }

                section {
                    h2 class="text-2xl font-bold text-white" { "Watchlist" }
                    @if data.watchlist.is_empty() { p class="mt-4 text-gray-500" { "Your watchlist is empty." } }
                    @else { (poster_grid(data.watchlist)) }
                }

                @if nav.is_admin {
                    (admin_panel())
                }
            }
        },
    )
}

fn admin_panel() -> Markup {
    html! {
        section class="bg-gray-900 rounded-lg p-6" {
            h2 class="text-2xl font-bold text-white" { "Admin" }
            form class="mt-4 space-y-3" method="post" action="/admin/posters" enctype="multipart/form-data" {
                input class="text-gray-300" type="file" name="poster" accept="image/*" required;
                button class=(SECONDARY_BUTTON) type="submit" { "Upload poster" }
            }
            form class="mt-4" method="post" action="/admin/trailers/backfill" data-on-submit=(datastar_post("/admin/trailers/backfill")) {
                button class=(SECONDARY_BUTTON) type="submit" { "Find missing trailers" }
            }
            div id="admin-result" {}
        }
    }
}

pub fn poster_uploaded_page(nav: &Nav, url: &str) -> String {
    page(
        "Poster uploaded · Mehflix",
        Some(nav),
        html! {
            div class="max-w-xl mx-auto px-6 py-12" {
                div class="bg-gray-900 rounded-lg p-8" {
                    h1 class="text-2xl font-bold text-white" { "Poster uploaded" }
                    img class="mt-4 w-48 rounded" src=(url) alt="Uploaded poster";
                    input class=(TEXT_INPUT) readonly value=(url);
                    a class="mt-6 inline-block text-amber-400 hover:text-amber-300" href="/profile" { "Back" }
                }
            }
        },
    )
}

pub fn backfill_fragment(summary: &BackfillSummary) -> String {
    html! {
        div id="admin-result" class="mt-4 text-sm text-gray-300" {
            "Scanned " (summary.scanned) ": " (summary.updated) " updated, "
            (summary.not_found) " not found, " (summary.skipped) " skipped, " (summary.failed) " failed."
        }
    }
    .into_string()
}

pub fn backfill_page(nav: &Nav, summary: &BackfillSummary) -> String {
    page(
        "Trailer backfill · Mehflix",
        Some(nav),
        html! {
            div class="max-w-xl mx-auto px-6 py-12" {
                div class="bg-gray-900 rounded-lg p-8" {
                    h1 class="text-2xl font-bold text-white" { "Trailer backfill" }
                    (PreEscaped(backfill_fragment(summary)))
                    a class="mt-6 inline-block text-amber-400 hover:text-amber-300" href="/profile" { "Back" }
                }
            }
        },
    )
}

pub fn error_fragment(message: String) -> String {
    html! {
        div id="flash" class="fixed bottom-4 right-4 rounded-md bg-red-900 px-4 py-3 text-red-100 shadow" {
            (message)
        }
    }
    .into_string()
}

pub fn error_page(message: String) -> String {
    page(
        "Error",
        None,
        html! {
            div class="min-h-screen bg-gray-950 flex items-center justify-center" {
                div class="max-w-xl w-full px-6" {
                    div class="bg-gray-900 shadow rounded-lg p-8" {
                        h1 class="text-2xl font-bold text-white" { "Error" }
                        p class="mt-4 text-gray-300" { (message) }
                        a class="mt-6 inline-block text-amber-400 hover:text-amber-300" href="/" { "Back" }
                    }
                }
            }
        },
    )
}

const PRIMARY_BUTTON: &str =
    "rounded-md bg-amber-500 px-4 py-2 font-semibold text-gray-950 hover:bg-amber-400";
const SECONDARY_BUTTON: &str =
    "rounded-md border border-gray-700 px-4 py-2 font-semibold text-gray-100 hover:bg-gray-800";
const TEXT_INPUT: &str = "mt-2 w-full rounded-md border border-gray-700 bg-gray-950 px-3 py-2 text-gray-100 focus:border-amber-500 focus:outline-none";

fn datastar_post(url: &str) -> String {
    format!("evt.preventDefault(); @post('{url}', {{contentType: 'form'}})")
}

fn page(title: &str, nav: Option<&Nav>, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                script src=(TAILWIND_CDN) {}
                script type="module" src=(DATASTAR_CDN) {}
            }
            body class="bg-gray-950 min-h-screen" {
                @if let Some(nav) = nav {
                    (nav_bar(nav))
                }
                (body)
                div id="flash" {}
            }
        }
    }
    .into_string()
}

fn nav_bar(nav: &Nav) -> Markup {
    html! {
        nav class="border-b border-gray-800 bg-gray-900" {
            div class="max-w-6xl mx-auto px-6 py-4 flex items-center justify-between" {
                a class="text-xl font-bold text-amber-400" href="/" { "Mehflix" }
                div class="flex items-center gap-6 text-sm text-gray-300" {
                    (search_form("", "w-48"))
                    a class="hover:text-white" href="/categories" { "Categories" }
                    a class="hover:text-white" href="/profile" {
                        (nav.name)
                        @if nav.unread > 0 {
                            span class="ml-1 rounded-full bg-amber-500 px-2 text-xs text-gray-950" { (nav.unread) }
                        }
                    }
                    form method="post" action="/logout" {
                        button class="hover:text-white" type="submit" { "Sign out" }
                    }
                }
            }
        }
    }
}

fn search_form(term: &str, class: &str) -> Markup {
    html! {
        form class=(class) method="get" action="/search" role="search" {
            input class=(TEXT_INPUT) type="search" name="q" value=(term) placeholder="Search trailers..." aria-label="Search trailers";
        }
    }
}

fn poster_grid(trailers: &[Trailer]) -> Markup {
    html! {
        div class="mt-4 grid grid-cols-2 gap-4 sm:grid-cols-3 md:grid-cols-5" {
            @for trailer in trailers {
                a class="group block" href=(format!("/movie/{}", urlencoding::encode(&trailer.id))) {
                    img class="w-full aspect-[2/3] rounded-lg object-cover group-hover:opacity-80" src=(trailer.poster_url) alt=(trailer.title) loading="lazy";
                    p class="mt-2 text-sm text-gray-200 truncate" { (trailer.title) }
                }
            }
        }
    }
}

fn input_field(name: &str, label: &str, kind: &str) -> Markup {
    html! {
        div {
            label class="block text-sm font-medium text-gray-300" for=(name) { (label) }
            input class=(TEXT_INPUT) type=(kind) name=(name) required;
        }
    }
}

fn flash(error: Option<&str>, notice: Option<&str>) -> Markup {
    html! {
        @if let Some(error) = error {
            p class="mt-4 rounded-md bg-red-900/60 px-3 py-2 text-sm text-red-100" { (error) }
        }
        @if let Some(notice) = notice {
            p class="mt-4 rounded-md bg-emerald-900/60 px-3 py-2 text-sm text-emerald-100" { (notice) }
        }
    }
}
