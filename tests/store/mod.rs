mod agents;
mod migrations;
mod monitors;
mod notifications;
mod results;
mod schedules;
mod users;
